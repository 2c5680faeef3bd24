use clap::Parser;
use log::{error, info, trace, warn};
use std::{
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{Notify, broadcast},
    task::JoinSet,
};

use conduit::Pipeline;
use conduit_codec::DEFAULT_MAX_OBJECT_SIZE;
use conduit_demos::{echo_pipeline, init_logger};

#[derive(Parser)]
#[command(name = "Object Echo Server")]
#[command(version = "0.0.0")]
#[command(about = "An example of a length-prefixed object echo server over tcp", long_about = None)]
struct Cli {
    #[arg(short, long)]
    debug: bool,
    #[arg(long, default_value_t = format!("0.0.0.0"))]
    host: String,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, default_value_t = format!("INFO"))]
    log_level: String,
    #[arg(long, default_value_t = 60)]
    idle_secs: u64,
    #[arg(long, default_value_t = DEFAULT_MAX_OBJECT_SIZE)]
    max_object_size: usize,
}

async fn process_pipeline(
    mut stream: TcpStream,
    mut stop_rx: broadcast::Receiver<()>,
    pipeline: Arc<Pipeline>,
) -> anyhow::Result<()> {
    let mut buf = vec![0; 2000];

    let writable = Arc::new(Notify::new());
    let notify = writable.clone();
    pipeline.set_write_notify(Arc::new(move || notify.notify_one()));

    pipeline.transport_active();
    loop {
        // prioritize stream.write than stream.read
        while let Some(transmit) = pipeline.poll_write() {
            match stream.write_all(&transmit).await {
                Ok(()) => {
                    trace!("stream write {} bytes", transmit.len());
                }
                Err(err) => {
                    warn!("stream write error {}", err);
                    break;
                }
            }
        }
        if pipeline.is_closed() {
            break;
        }

        // Poll pipeline to get next timeout
        let mut eto = Instant::now() + Duration::from_millis(100);
        pipeline.poll_timeout(&mut eto);

        let delay_from_now = eto
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::from_secs(0));
        if delay_from_now.is_zero() {
            pipeline.handle_timeout(Instant::now());
            continue;
        }

        let timer = tokio::time::sleep(delay_from_now);
        tokio::pin!(timer);

        tokio::select! {
            _ = stop_rx.recv() => {
                trace!("pipeline stream exit loop");
                break;
            }
            _ = writable.notified() => {}
            _ = timer.as_mut() => {
                pipeline.handle_timeout(Instant::now());
            }
            res = stream.read(&mut buf) => {
                match res {
                    Ok(0) => {
                        pipeline.handle_eof();
                    }
                    Ok(n) => {
                        trace!("stream read {} bytes", n);
                        pipeline.handle_read(&buf[..n]);
                    }
                    Err(err) => {
                        warn!("stream read error {}", err);
                        break;
                    }
                }
            }
        }
    }
    pipeline.transport_inactive();

    for fault in pipeline.take_unhandled_faults() {
        warn!("unhandled fault: {}", fault);
    }
    trace!(
        "tcp connection on {} is gracefully down",
        stream.peer_addr()?
    );

    Ok(())
}

async fn run(mut stop_rx: broadcast::Receiver<()>, cli: Cli) -> anyhow::Result<()> {
    let mut workers = JoinSet::new();
    let idle = Duration::from_secs(cli.idle_secs);

    let listener = TcpListener::bind(format!("{}:{}", cli.host, cli.port)).await?;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                trace!("listener exit loop");
                break;
            }
            res = listener.accept() => {
                match res {
                    Ok((stream, addr)) => {
                        info!("Connection from {addr}");
                        let peer = addr.to_string();
                        let pipeline = Arc::new(echo_pipeline(idle, cli.max_object_size, &peer)?);
                        let stream_stop_rx = stop_rx.resubscribe();
                        workers.spawn(async move {
                            if let Err(err) = process_pipeline(stream, stream_stop_rx, pipeline).await {
                                error!("process_pipeline got error: {}", err);
                            }
                        });
                    }
                    Err(err) => {
                        warn!("listener accept error {}", err);
                        break;
                    }
                }
            }
        }
    }

    info!("Wait for Gracefully Shutdown...");
    while workers.join_next().await.is_some() {}
    info!("Server is Gracefully Shutdown Completed");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_level = log::LevelFilter::from_str(&cli.log_level)?;
    if cli.debug {
        init_logger(log_level);
    }

    let (stop_tx, stop_rx) = broadcast::channel::<()>(1);

    info!("Press Ctrl-C to stop");
    info!("listening on {}:{}", cli.host, cli.port);
    let mut stop_tx = Some(stop_tx);
    ctrlc::set_handler(move || {
        if let Some(stop_tx) = stop_tx.take() {
            let _ = stop_tx.send(());
        }
    })?;

    if let Err(err) = run(stop_rx, cli).await {
        error!("run got error: {}", err);
    }

    Ok(())
}
