pub mod arguments;
mod run;

pub use run::{Report, run};
use {anyhow::Context, clap::Parser};

pub async fn start(args: impl Iterator<Item = String>) -> anyhow::Result<()> {
    let args = arguments::Arguments::parse_from(args);
    observe::tracing::initialize(&observe::Config::new(
        &args.log_filter,
        args.log_stderr_threshold,
        args.use_json_logs,
    ));
    tracing::info!("running allocator with validated arguments:\n{}", args);
    observe::metrics::setup_registry(Some("allocator".into()), None);

    let report = run(&args).await?;
    let report = serde_json::to_string_pretty(&report).context("serializing report")?;
    println!("{report}");
    tracing::debug!(
        "collected metrics:\n{}",
        observe::metrics::encode(observe::metrics::get_registry())
    );
    Ok(())
}
