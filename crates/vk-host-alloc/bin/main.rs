mod cmd;
use clap::{Parser, Subcommand};
use cmd::replay::ReplayArgs;
use eyre::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Subcommand, Debug)]
pub enum VhaSubcommand {
    #[command(about = "Replay a synthetic driver workload through the allocation callbacks")]
    Replay(ReplayArgs),
}

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "vk-host-alloc CLI: exercise the tracked Vulkan host allocator and report live blocks

Set RUST_LOG=vk_host_alloc=trace to see every callback."
)]
pub struct VhaArgs {
    #[command(subcommand)]
    pub cmd: VhaSubcommand,
}

fn main() -> Result<()> {
    let root_args = VhaArgs::parse();
    init_logging();

    match root_args.cmd {
        VhaSubcommand::Replay(args) => {
            args.run()?;
        }
    }

    Ok(())
}

fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}
