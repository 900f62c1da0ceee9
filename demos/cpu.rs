//! Reports CPU time counters (idle, nice, system, total, user) accumulated
//! over each interval. Reads `/proc/stat`, so Linux only.
//!
//! ```sh
//! cargo run --example cpu -- --addr 127.0.0.1:2003 --prefix servers.web01.cpu --tags dc=eu1
//! ```

use std::time::{Duration, SystemTime};

use anyhow::Context;
use clap::Parser;
use graphite_client::{CancellationToken, GraphiteClient, MetricKey, MetricSender, Tags};
use tokio::time::{interval_at, Instant};

/// Report CPU usage to a Graphite server
#[derive(Parser, Debug)]
#[command(name = "cpu")]
#[command(about = "Report CPU usage to a Graphite server", long_about = None)]
struct Cli {
    /// Graphite server address
    #[arg(long)]
    addr: String,

    /// Graphite metric prefix
    #[arg(long, default_value = "cpu")]
    prefix: MetricKey,

    /// Graphite metric tags, as `name=value,...`
    #[arg(long, default_value = "")]
    tags: Tags,

    /// Interval between CPU usage reports in seconds
    #[arg(long, default_value_t = 1)]
    interval: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct CpuTimes {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    total: u64,
}
impl CpuTimes {
    fn since(&self, earlier: &CpuTimes) -> [(&'static str, u64); 5] {
        [
            ("idle", self.idle.saturating_sub(earlier.idle)),
            ("nice", self.nice.saturating_sub(earlier.nice)),
            ("system", self.system.saturating_sub(earlier.system)),
            ("total", self.total.saturating_sub(earlier.total)),
            ("user", self.user.saturating_sub(earlier.user)),
        ]
    }
}

async fn read_cpu_times() -> anyhow::Result<CpuTimes> {
    let stat = tokio::fs::read_to_string("/proc/stat")
        .await
        .context("failed to read /proc/stat")?;
    let line = stat
        .lines()
        .find(|line| line.starts_with("cpu "))
        .context("no aggregate cpu line in /proc/stat")?;
    // user nice system idle iowait irq softirq steal
    let fields = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("malformed cpu line: {line:?}"))?;
    let field = |i: usize| fields.get(i).copied().unwrap_or(0);
    Ok(CpuTimes {
        user: field(0),
        nice: field(1),
        system: field(2),
        idle: field(3),
        total: fields.iter().sum(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let base = MetricKey::new(cli.prefix.path(), cli.tags)?;
    let mut client = GraphiteClient::builder()
        .address(cli.addr)
        .max_metrics_per_message(5)
        .build()
        .await?;

    let cancel = CancellationToken::new();
    let period = Duration::from_secs(cli.interval.max(1));
    let sampler = tokio::spawn(report_cpu_usage(
        client.sender(),
        base,
        period,
        cancel.clone(),
    ));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    let res = client.submit(&cancel).await;
    cancel.cancel();
    sampler.await??;
    match res {
        Err(e) if !e.is_cancelled() => Err(e.into()),
        _ => Ok(()),
    }
}

async fn report_cpu_usage(
    sender: MetricSender,
    base: MetricKey,
    period: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut previous = read_cpu_times().await?;
    let mut ticks = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            _ = ticks.tick() => {}
        }
        let timestamp = SystemTime::now();
        let current = read_cpu_times().await?;
        for (name, value) in current.since(&previous) {
            let key = base.sub_metric(name, base.tags().clone())?;
            match sender
                .send_metric(&key, value.to_string(), timestamp, &cancel)
                .await
            {
                Err(e) if e.is_cancelled() => return Ok(()),
                res => res.context("failed to queue CPU metric")?,
            }
        }
        previous = current;
    }
}
