use std::collections::HashMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

pub const DEFAULT_MESSAGE: &str = "Game on!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConfig {
    pub message: String,
    pub delay_minutes: i64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            message: DEFAULT_MESSAGE.to_string(),
            delay_minutes: 0,
        }
    }
}

lazy_static! {
    static ref SECTION_REGEX: Regex = Regex::new(r"^\[+(.*?)\]*$").unwrap();
    static ref ENTRY_REGEX: Regex = Regex::new(r"^([^=]*?)\s*=\s*(.*)$").unwrap();
}

/// Per-game defaults for `/goplay`, keyed by upper-cased game name.
#[derive(Debug, Clone, Default)]
pub struct GameConfigs {
    games: HashMap<String, GameConfig>,
}

impl GameConfigs {
    /// A missing or unreadable file just means there is nothing configured.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let configs = Self::parse(&content);
                log::info!(
                    "Loaded {} game configs from {}",
                    configs.games.len(),
                    path.display()
                );
                configs
            }
            Err(e) => {
                log::warn!("Couldn't read game config {}: {e}", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut games = HashMap::new();
        let mut current: Option<String> = None;

        for line in content.lines().map(str::trim) {
            if line.starts_with('[') {
                current = SECTION_REGEX
                    .captures(line)
                    .map(|c| c[1].to_uppercase())
                    .filter(|name| !name.is_empty());
                if let Some(name) = &current {
                    games.insert(name.clone(), GameConfig::default());
                }
                continue;
            }

            let Some(name) = &current else { continue };
            let Some(entry) = ENTRY_REGEX.captures(line) else {
                continue;
            };
            let Some(game) = games.get_mut(name) else {
                continue;
            };

            match &entry[1] {
                "msg" => game.message = entry[2].to_string(),
                // an unparsable value keeps what we had
                "time" => {
                    if let Ok(minutes) = entry[2].parse() {
                        game.delay_minutes = minutes;
                    }
                }
                _ => {}
            }
        }

        Self { games }
    }

    pub fn get(&self, game: &str) -> GameConfig {
        self.games
            .get(&game.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "
# outside of any section
msg = ignored

[dota2]
msg = Radiant needs you
time = 15

[Pubg]
time = soon
msg=Drop in = now

[custom]
time = 3
time = later
";

    #[test]
    fn sections_are_upper_cased_and_filled() {
        let configs = GameConfigs::parse(SAMPLE);

        assert_eq!(
            configs.get("DOTA2"),
            GameConfig {
                message: "Radiant needs you".to_string(),
                delay_minutes: 15
            }
        );
        assert_eq!(configs.get("dota2"), configs.get("DOTA2"));
    }

    #[test]
    fn invalid_time_keeps_previous_value() {
        let configs = GameConfigs::parse(SAMPLE);

        let pubg = configs.get("PUBG");
        assert_eq!(pubg.delay_minutes, 0);
        assert_eq!(pubg.message, "Drop in = now");

        assert_eq!(configs.get("CUSTOM").delay_minutes, 3);
    }

    #[test]
    fn unknown_games_get_the_default() {
        let configs = GameConfigs::parse(SAMPLE);
        assert_eq!(configs.get("tetris"), GameConfig::default());
        assert_eq!(configs.get("tetris").message, "Game on!");
    }

    #[test]
    fn section_without_entries_uses_defaults() {
        let configs = GameConfigs::parse("[chess]\n\ngarbage line\n");
        assert_eq!(configs.get("CHESS"), GameConfig::default());
        assert_eq!(configs.games.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_means_no_configs() {
        let configs = GameConfigs::load("/nonexistent/game.conf").await;
        assert!(configs.games.is_empty());
        assert_eq!(configs.get("DOTA2"), GameConfig::default());
    }

    #[tokio::test]
    async fn loads_from_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[pubg]\ntime = 5\n").unwrap();

        let configs = GameConfigs::load(file.path()).await;
        assert_eq!(configs.get("PUBG").delay_minutes, 5);
    }
}
