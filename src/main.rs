mod commands;
mod config;
mod dispatcher;
mod messages;
mod registry;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dptree::deps;
use teloxide::adaptors::throttle::Limits;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, ReplyParameters, UserId};
use teloxide::utils::command::BotCommands;

use commands::{App, Command, Invocation};
use config::GameConfigs;
use storage::Storage;

pub type Bot = teloxide::adaptors::Throttle<teloxide::Bot>;

/// Telegram bot that gathers people for a game.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Bot token.
    #[arg(short, long, env = "TG_TOKEN", hide_env_values = true)]
    token: String,

    /// Per-game defaults for /goplay.
    #[arg(short, long, env = "GAMEBOT_CONFIG", default_value = "/etc/tg-bot/game.conf")]
    config: PathBuf,

    /// Where subscriptions and bans are stored.
    #[arg(short, long, env = "GAMEBOT_DATA", default_value = "/etc/tg-bot/subscriptions.json")]
    data: PathBuf,

    /// Telegram id of the user allowed to run /ban, /unban and /rmcat.
    #[arg(short, long, env = "GAMEBOT_OWNER")]
    owner: Option<u64>,
}

async fn answer(bot: Bot, msg: Message, cmd: Command, app: Arc<App>) -> ResponseResult<()> {
    log::info!("{:?}", cmd);
    let Some(inv) = Invocation::from_message(&msg) else {
        return Ok(());
    };

    if let Some(reply) = app.handle(&inv, cmd).await {
        bot.send_message(msg.chat.id, reply)
            .parse_mode(ParseMode::Html)
            .reply_parameters(ReplyParameters::new(msg.id))
            .await?;
    }

    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
                return;
            }
            Err(e) => log::warn!("Cannot listen for SIGTERM: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Flushes the store once more before the dispatcher is stopped.
async fn shutdown_on_signal(app: Arc<App>, token: ShutdownToken) {
    wait_for_signal().await;
    log::info!("Shutting down...");

    app.persist().await;

    match token.shutdown() {
        Ok(done) => done.await,
        Err(e) => log::warn!("Dispatcher was not running: {e}"),
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    log::info!("Starting bot...");

    let bot: Bot = teloxide::Bot::new(args.token).throttle(Limits::default());
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        log::warn!("Couldn't register command list: {e}");
    }

    let games = GameConfigs::load(&args.config).await;
    let storage = Storage::new(args.data);
    log::info!("Using store {}", storage.path().display());
    let owner = args.owner.map(UserId);
    let app = Arc::new(App::new(games, storage, owner, Arc::new(bot.clone())).await);

    let mut dispatcher = Dispatcher::builder(
        bot,
        Update::filter_message()
            .filter_command::<Command>()
            .endpoint(answer),
    )
    .dependencies(deps![app.clone()])
    .default_handler(|_| async {})
    .build();

    tokio::spawn(shutdown_on_signal(app, dispatcher.shutdown_token()));

    dispatcher.dispatch().await;
    log::info!("Bot stopped.");
}
