use chrono::Utc;
use clap::Parser;
use log::{error, info, warn};
use parley::calls::{
    BroadcastPresenter, CallBackends, CallHandler, CallManager, LocalUser, NoticeKind,
    PresenterEvent,
};
use parley::config::CallConfig;
use parley::handlers::EventRouter;
use parley::loopback::{LoopbackClient, LoopbackMedia, LoopbackPeerFactory, LoopbackRelay};
use parley::socket::SocketChannel;
use parley::types::{CallState, SessionView, UserId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

// Demo: two users on an in-process relay, one calling the other.
//
// Usage:
//   cargo run                          # alice calls bob, bob answers
//   cargo run -- --decline             # bob declines
//   cargo run -- --deny-media          # bob's microphone is refused
//   cargo run -- --talk-for 10         # stay connected for 10 seconds
//   cargo run -- -c call.json          # load timeouts and STUN servers
//
// With `signaling_url` set in the config, the binary instead joins that relay
// as `--user-id` and answers every incoming call.

#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Voice call session demo")]
struct Args {
    /// JSON call configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Callee declines the call.
    #[arg(long)]
    decline: bool,
    /// Callee's microphone permission is refused.
    #[arg(long)]
    deny_media: bool,
    /// Seconds to stay connected before hanging up.
    #[arg(long, default_value_t = 3)]
    talk_for: u64,
    /// Own user id when joining a real relay.
    #[arg(long, default_value_t = 1)]
    user_id: i64,
    #[arg(long, default_value = "parley")]
    username: String,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Utc::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return;
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("Demo failed: {e:#}");
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => CallConfig::from_json_file(path)?,
        None => CallConfig::default(),
    };
    info!(
        "No-answer timeout {}s, {} ICE server(s)",
        config.no_answer_timeout_secs,
        config.ice_servers.len()
    );
    if let Some(url) = config.signaling_url.clone() {
        let user = LocalUser::new(UserId(args.user_id), args.username);
        return answer_on_relay(&url, user, config).await;
    }

    let relay = LoopbackRelay::new();
    let alice = relay.join(LocalUser::new(UserId(1), "alice"), config.clone());
    let bob = relay.join(LocalUser::new(UserId(2), "bob"), config);
    bob.media.set_deny(args.deny_media);

    let mut alice_events = alice.presenter.subscribe();
    let mut bob_events = bob.presenter.subscribe();
    let _alice_log = spawn_printer("alice", alice.presenter.subscribe());
    let _bob_log = spawn_printer("bob", bob.presenter.subscribe());

    let call_id = alice
        .manager
        .place_call(bob.user.id, Some(bob.user.username.clone()))
        .await?;
    info!("Placed call {call_id}");

    wait_for(&mut bob_events, |v| v.state == CallState::Ringing).await?;
    if args.decline {
        bob.manager.reject(&call_id).await?;
    } else {
        bob.manager.accept(&call_id).await?;
    }

    let view = wait_for(&mut alice_events, |v| {
        v.state == CallState::Connected || v.state == CallState::Ended
    })
    .await?;

    if view.state == CallState::Connected {
        talk(&alice, Duration::from_secs(args.talk_for)).await?;
        alice.manager.hang_up().await?;
        wait_for(&mut bob_events, |v| v.state == CallState::Ended).await?;
    } else {
        info!(
            "Call did not connect: {}",
            view.end_reason.map(|r| r.describe()).unwrap_or("unknown")
        );
    }

    info!("Relay saw {} message(s)", relay.sent().len());
    alice.manager.shutdown().await;
    bob.manager.shutdown().await;
    Ok(())
}

/// Joins a relay over WebSocket and answers incoming calls until Ctrl-C.
async fn answer_on_relay(url: &str, user: LocalUser, config: CallConfig) -> anyhow::Result<()> {
    let (channel, reader) = SocketChannel::connect(url).await?;
    let presenter = Arc::new(BroadcastPresenter::default());
    let mut events = presenter.subscribe();
    let _log = spawn_printer("me", presenter.subscribe());
    let manager = CallManager::spawn(
        user,
        config,
        CallBackends {
            channel: channel.clone(),
            media: Arc::new(LoopbackMedia::new()),
            peers: Arc::new(LoopbackPeerFactory::new()),
            presenter,
        },
    );

    let mut router = EventRouter::new();
    router.register(Arc::new(CallHandler::new(manager.clone())));
    let pump = reader.spawn(Arc::new(router));
    info!("Waiting for calls on {url}");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PresenterEvent::Render(view)) if view.state == CallState::Ringing => {
                    if let Some(call_id) = view.call_id {
                        if let Err(e) = manager.accept(&call_id).await {
                            warn!("Could not answer {call_id}: {e}");
                        }
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, hanging up");
                let _ = manager.hang_up().await;
                break;
            }
        }
        if pump.is_finished() {
            warn!("Relay connection lost");
            break;
        }
    }

    manager.shutdown().await;
    channel.close().await;
    Ok(())
}

async fn talk(client: &LoopbackClient, duration: Duration) -> anyhow::Result<()> {
    let half = duration / 2;
    tokio::time::sleep(half).await;
    let muted = client.manager.toggle_mute().await?;
    info!("{} muted: {muted}", client.user.username);
    tokio::time::sleep(duration - half).await;
    Ok(())
}

async fn wait_for(
    events: &mut broadcast::Receiver<PresenterEvent>,
    pred: impl Fn(&SessionView) -> bool,
) -> anyhow::Result<SessionView> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(PresenterEvent::Render(view)) if pred(&view) => return Ok(view),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Presenter lagged by {n} event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow::anyhow!("presenter closed"));
                }
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(45), wait)
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for call state"))?
}

fn spawn_printer(
    who: &'static str,
    mut events: broadcast::Receiver<PresenterEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PresenterEvent::Render(view) => match view.elapsed_formatted() {
                    Some(elapsed) => info!(target: "Demo", "{who}: {} {elapsed}", view.state),
                    None => info!(
                        target: "Demo",
                        "{who}: {} ({})",
                        view.state,
                        view.remote_display_name.as_deref().unwrap_or("-")
                    ),
                },
                PresenterEvent::Notice(notice) => match notice.kind {
                    NoticeKind::Error | NoticeKind::Warning => {
                        warn!(target: "Demo", "{who}: {}", notice.message)
                    }
                    _ => info!(target: "Demo", "{who}: {}", notice.message),
                },
            }
        }
    })
}
