use super::exit_codes;
use crate::cli::args::HistoryArgs;
use prepcheck_core::storage::store::Store;

pub fn cmd_history(args: HistoryArgs) -> anyhow::Result<i32> {
    if !args.db.exists() {
        eprintln!("no history at {} (run `prepcheck run` first)", args.db.display());
        return Ok(exit_codes::OK);
    }
    let store = Store::open(&args.db)?;
    store.init_schema()?;
    let rows = store.fetch_recent_results(&args.suite, args.limit)?;

    if rows.is_empty() {
        eprintln!("no results for suite '{}'", args.suite);
        return Ok(exit_codes::OK);
    }

    if args.json {
        for r in &rows {
            println!("{}", serde_json::to_string(r)?);
        }
        return Ok(exit_codes::OK);
    }

    println!(
        "{:<6} {:<26} {:<32} {:<9} {:<6} {:<20} {:>5} {:>9}",
        "RUN", "STARTED", "TARGET", "POLICY", "STATUS", "FAILURE", "STEP", "MS"
    );
    for r in &rows {
        println!(
            "{:<6} {:<26} {:<32} {:<9} {:<6} {:<20} {:>5} {:>9}",
            r.run_id,
            r.started_at,
            r.target,
            r.policy,
            r.status.as_str(),
            r.failure_kind.as_deref().unwrap_or("-"),
            r.failing_step.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            r.duration_ms.map(|d| d.to_string()).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(exit_codes::OK)
}
