use std::env;

use anyhow::Result;

use tsbx::scheduler::{ContainerScheduler, DockerScheduler};

/// A thin ops CLI over the Container Scheduler Port: inspect a container,
/// tail its logs, ping the runtime. Not part of the request path -- for
/// operators poking at a box where `tsbx-controller` is running.
#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "inspect" => cmd_inspect(args.get(2)).await,
        "logs" => cmd_logs(args.get(2), args.get(3)).await,
        "ping" => cmd_ping().await,
        "version" | "-v" | "--version" => {
            println!("tsbx-sandboxd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn scheduler() -> Result<DockerScheduler> {
    let docker = bollard::Docker::connect_with_local_defaults()?;
    let port: u16 = env::var("TSBX_EXECUTOR_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
    Ok(DockerScheduler::new(docker, port))
}

async fn cmd_inspect(id: Option<&String>) -> Result<()> {
    let id = require_arg(id, "inspect <container_id>")?;
    let sched = scheduler().await?;
    let info = sched.inspect(id).await?;
    println!("status:     {:?}", info.status);
    println!("image:      {}", info.image);
    println!("exit_code:  {:?}", info.exit_code);
    println!("started_at: {:?}", info.started_at);
    println!("exited_at:  {:?}", info.exited_at);
    println!("ip:         {:?}", info.ip);
    Ok(())
}

async fn cmd_logs(id: Option<&String>, tail: Option<&String>) -> Result<()> {
    let id = require_arg(id, "logs <container_id> [tail]")?;
    let tail: usize = tail.and_then(|t| t.parse().ok()).unwrap_or(200);
    let sched = scheduler().await?;
    let logs = sched.logs(id, tail).await?;
    print!("{logs}");
    Ok(())
}

async fn cmd_ping() -> Result<()> {
    let sched = scheduler().await?;
    sched.ping().await?;
    println!("runtime reachable");
    Ok(())
}

fn require_arg<'a>(arg: Option<&'a String>, usage: &str) -> Result<&'a str> {
    arg.map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("usage: tsbx-sandboxd {usage}"))
}

fn print_usage() {
    println!("tsbx-sandboxd - sandbox runtime inspection CLI");
    println!();
    println!("Usage:");
    println!("  tsbx-sandboxd inspect <container_id>         Show container status");
    println!("  tsbx-sandboxd logs <container_id> [tail]      Tail container logs");
    println!("  tsbx-sandboxd ping                             Check runtime connectivity");
    println!("  tsbx-sandboxd version                          Show CLI version");
}
