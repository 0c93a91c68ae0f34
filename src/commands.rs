use std::sync::Arc;

use teloxide::macros::BotCommands;
use teloxide::types::{ChatId, Message, UserId};

use crate::config::GameConfigs;
use crate::dispatcher::{Announcer, Dispatch, Dispatcher};
use crate::messages;
use crate::registry::{BanList, CategoryKey, JoinOutcome, Registry, Subscriber};
use crate::storage::{Storage, StoredData};

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
pub enum Command {
    #[command(description = "show this text.")]
    Start,
    #[command(description = "subscribe to a game.")]
    Join(String),
    #[command(description = "unsubscribe from a game.")]
    Leave(String),
    #[command(description = "call everyone for a game, optionally after some minutes.")]
    Goplay(String),
    #[command(description = "call everyone for a game right now.")]
    Gamenow(String),
    #[command(description = "show the games of this chat without tagging anyone.")]
    List,
    #[command(hide)]
    Ban(String),
    #[command(hide)]
    Unban(String),
    #[command(hide)]
    Rmcat(String),
}

/// Who sent a command, and where.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub first_name: String,
    pub username: Option<String>,
}

impl Invocation {
    pub fn from_message(msg: &Message) -> Option<Self> {
        let user = msg.from.as_ref()?;
        Some(Self {
            chat_id: msg.chat.id,
            user_id: user.id,
            first_name: user.first_name.clone(),
            username: user.username.clone(),
        })
    }

    fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.first_name)
    }

    fn subscriber(&self) -> Subscriber {
        Subscriber::new(self.user_id, &self.first_name)
    }
}

/// Splits arguments like a posix shell. `None` if the quoting is broken.
fn split(args: &str) -> Option<Vec<String>> {
    shlex::split(args)
}

fn game_arg(args: &str) -> Option<String> {
    split(args)?.into_iter().next()
}

fn user_arg(args: &str) -> Option<UserId> {
    let id = split(args)?.into_iter().next()?.parse().ok()?;
    Some(UserId(id))
}

/// Everything the command handlers share.
pub struct App {
    pub registry: Registry,
    pub bans: BanList,
    pub games: GameConfigs,
    pub storage: Storage,
    pub dispatcher: Dispatcher,
    pub owner: Option<UserId>,
}

impl App {
    pub async fn new(
        games: GameConfigs,
        storage: Storage,
        owner: Option<UserId>,
        announcer: Arc<dyn Announcer>,
    ) -> Self {
        let (registry, bans) = match storage.load().await {
            Some(data) => data.into_state(),
            None => (Registry::new(), BanList::new()),
        };
        let dispatcher = Dispatcher::new(registry.clone(), announcer);

        Self {
            registry,
            bans,
            games,
            storage,
            dispatcher,
            owner,
        }
    }

    pub async fn persist(&self) {
        let data = StoredData::capture(&self.registry, &self.bans).await;
        self.storage.save(&data).await;
    }

    fn is_owner(&self, user_id: UserId) -> bool {
        self.owner == Some(user_id)
    }

    /// Runs a command and returns the reply, if any.
    pub async fn handle(&self, inv: &Invocation, cmd: Command) -> Option<String> {
        let admin = matches!(
            cmd,
            Command::Ban(_) | Command::Unban(_) | Command::Rmcat(_)
        );
        if admin && !self.is_owner(inv.user_id) {
            log::info!("Ignoring {cmd:?} from non-owner {}", inv.user_id);
            return None;
        }

        let reply = match cmd {
            Command::Start => messages::welcome(),
            Command::Join(args) => {
                let Some(game) = game_arg(&args) else {
                    return Some(messages::usage("/join <game>"));
                };
                let key = CategoryKey::new(inv.chat_id, &game);
                match self.registry.join(&key, inv.subscriber()).await {
                    JoinOutcome::Joined => {
                        self.persist().await;
                        messages::joined(key.category())
                    }
                    JoinOutcome::AlreadyMember => messages::already_joined(),
                }
            }
            Command::Leave(args) => {
                let Some(game) = game_arg(&args) else {
                    return Some(messages::usage("/leave <game>"));
                };
                let key = CategoryKey::new(inv.chat_id, &game);
                if self.registry.leave(&key, inv.user_id).await {
                    self.persist().await;
                }
                messages::left(key.category())
            }
            Command::Goplay(args) => {
                let parts = split(&args).unwrap_or_default();
                let Some(game) = parts.first() else {
                    return Some(messages::usage("/goplay <game> [minutes]"));
                };
                let key = CategoryKey::new(inv.chat_id, game);
                let config = self.games.get(key.category());
                let delay = parts
                    .get(1)
                    .and_then(|d| d.parse().ok())
                    .unwrap_or(config.delay_minutes);

                let dispatch = self
                    .dispatcher
                    .dispatch_delayed(&key, &config.message, inv.display_name(), delay)
                    .await;
                match dispatch {
                    Dispatch::Sent => return None,
                    Dispatch::Scheduled(scheduled) => {
                        log::info!("{key}: gathering armed for {}", scheduled.fires_at());
                        messages::scheduled(key.category(), delay)
                    }
                }
            }
            Command::Gamenow(args) => {
                let Some(game) = game_arg(&args) else {
                    return Some(messages::usage("/gamenow <game>"));
                };
                let key = CategoryKey::new(inv.chat_id, &game);
                self.dispatcher
                    .dispatch_now(&key, "Starting NOW!", inv.display_name())
                    .await;
                return None;
            }
            Command::List => {
                let categories = self.registry.list_all(inv.chat_id).await;
                messages::group_summary(&categories)
            }
            Command::Ban(args) => {
                let Some(user_id) = user_arg(&args) else {
                    return Some(messages::usage("/ban <user id>"));
                };
                if !self.bans.is_banned(user_id).await {
                    self.bans.ban(user_id).await;
                    self.persist().await;
                }
                messages::banned(user_id.0)
            }
            Command::Unban(args) => {
                let Some(user_id) = user_arg(&args) else {
                    return Some(messages::usage("/unban <user id>"));
                };
                self.bans.unban(user_id).await;
                self.persist().await;
                messages::unbanned(user_id.0)
            }
            Command::Rmcat(args) => {
                let Some(game) = game_arg(&args) else {
                    return Some(messages::usage("/rmcat <game>"));
                };
                let key = CategoryKey::new(inv.chat_id, &game);
                self.registry.clear_category(&key).await;
                self.persist().await;
                messages::category_removed(key.category())
            }
        };

        Some(reply)
    }
}
