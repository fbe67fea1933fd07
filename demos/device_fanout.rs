use anyhow::{Context, bail};
use rbatch::batch::{
    BatchRecordLevel, BatchRecorder, Executor, FnExecutor, ItemContext, ReplayExecutor,
    RunContext,
};
use rbatch::config::RunnerConfig;
use rbatch::device::{
    ConnectionSecurityOptions, DeviceJob, DeviceOperation, Inventory, SecurityLevel, SshExecutor,
    device_batch,
};
use rbatch::error::OperationError;
use std::env;
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example device_fanout -- <inventory.json> [--command <cmd>]... [--configure] \
         [--concurrency N] [--timeout SECS] [--security secure|balanced|legacy] \
         [--dry-run] [--simulate] [--replay <in.jsonl>] [--record <out.jsonl>] [--json]"
    );
}

#[derive(Default)]
struct Options {
    inventory: String,
    commands: Vec<String>,
    configure: bool,
    runner: RunnerConfig,
    security: SecurityLevel,
    dry_run: bool,
    simulate: bool,
    replay: Option<String>,
    record: Option<String>,
    json: bool,
}

fn parse_args() -> anyhow::Result<Options> {
    let mut args = env::args().skip(1);
    let mut options = Options::default();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--command" | "-c" => options
                .commands
                .push(args.next().context("--command needs a value")?),
            "--configure" => options.configure = true,
            "--concurrency" => {
                options.runner.max_concurrency = args
                    .next()
                    .context("--concurrency needs a value")?
                    .parse()
                    .context("--concurrency must be a number")?;
            }
            "--timeout" => {
                let secs = args
                    .next()
                    .context("--timeout needs a value")?
                    .parse()
                    .context("--timeout must be a number of seconds")?;
                options.runner.item_timeout_secs = Some(secs);
            }
            "--security" => {
                options.security = args.next().context("--security needs a value")?.parse()?;
            }
            "--dry-run" => options.dry_run = true,
            "--simulate" => options.simulate = true,
            "--replay" => options.replay = Some(args.next().context("--replay needs a path")?),
            "--record" => options.record = Some(args.next().context("--record needs a path")?),
            "--json" => options.json = true,
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            flag if flag.starts_with('-') => bail!("Unknown flag: {flag}"),
            path if options.inventory.is_empty() => options.inventory = path.to_string(),
            extra => bail!("Unexpected argument: {extra}"),
        }
    }

    if options.inventory.is_empty() {
        bail!("missing inventory path");
    }
    if options.commands.is_empty() {
        options.commands.push("show version".to_string());
    }
    Ok(options)
}

/// Pretends to talk to each device. Hosts containing "down" never answer.
fn simulated_executor() -> Arc<dyn Executor<DeviceJob>> {
    Arc::new(FnExecutor::new(|ctx: ItemContext<DeviceJob>| async move {
        let DeviceJob { profile, operation } = ctx.payload;
        let delay = 50 + profile.host.bytes().map(u64::from).sum::<u64>() % 300;
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if profile.host.contains("down") {
            return Err(OperationError::ConnectTimeout(profile.device_addr()));
        }
        let plan = profile.platform().command_plan(&operation);
        Ok(plan
            .iter()
            .map(|command| format!("{}# {command}", profile.host))
            .collect::<Vec<_>>()
            .join("\n"))
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(err) => {
            eprintln!("{err:#}");
            print_usage();
            process::exit(2);
        }
    };

    let content = fs::read_to_string(&options.inventory)
        .with_context(|| format!("Failed to read inventory '{}'", options.inventory))?;
    let inventory = Inventory::from_json(&content)?;
    let operation = if options.configure {
        DeviceOperation::Configure {
            commands: options.commands.clone(),
        }
    } else {
        DeviceOperation::Show {
            commands: options.commands.clone(),
        }
    };
    let runner = options.runner.build()?;

    if options.dry_run {
        println!(
            "{} devices, max concurrency {}, item timeout {:?}",
            inventory.len(),
            runner.max_concurrency(),
            runner.item_timeout()
        );
        for device in &inventory.devices {
            println!("{} ({})", device.device_addr(), device.platform().name);
            for command in device.platform().command_plan(&operation) {
                println!("  {command}");
            }
        }
        return Ok(());
    }

    let executor: Arc<dyn Executor<DeviceJob>> = if let Some(path) = options.replay.as_deref() {
        let jsonl = fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording '{path}'"))?;
        Arc::new(ReplayExecutor::from_jsonl(&jsonl)?)
    } else if options.simulate {
        simulated_executor()
    } else {
        Arc::new(
            SshExecutor::new().with_security(ConnectionSecurityOptions::for_level(options.security)),
        )
    };

    let items = device_batch(&inventory, &operation, executor)?;
    let mut ctx = RunContext::new();
    let recorder = options
        .record
        .as_ref()
        .map(|_| BatchRecorder::new(BatchRecordLevel::Full));
    if let Some(recorder) = recorder.clone() {
        ctx = ctx.with_recorder(recorder);
    }

    let report = runner.run_with(items, ctx).await;

    if options.json {
        println!("{}", report.to_json()?);
    } else {
        for line in report.lines() {
            println!("{line}");
        }
    }

    if let (Some(path), Some(recorder)) = (options.record.as_deref(), recorder) {
        fs::write(path, recorder.to_jsonl()?)
            .with_context(|| format!("Failed to write recording '{path}'"))?;
        println!("Recording written to {path}");
    }

    if !report.all_succeeded() {
        process::exit(1);
    }
    Ok(())
}
