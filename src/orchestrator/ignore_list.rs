//! Chats the operator told us to leave alone.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};

use crate::orchestrator::persist::{read_json, write_json};

pub const IGNORE_FILE: &str = "ignored-chats.json";

pub struct IgnoreList {
    path: PathBuf,
    chats: Mutex<BTreeSet<String>>,
}

impl IgnoreList {
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(IGNORE_FILE);
        let chats: BTreeSet<String> = read_json(&path);
        if chats.is_empty() {
            info!("📁 No ignored chats");
        } else {
            info!("🔕 Loaded {} ignored chat(s)", chats.len());
        }
        Self { path, chats: Mutex::new(chats) }
    }

    pub fn contains(&self, chat_id: &str) -> bool {
        self.chats.lock().unwrap_or_else(|e| e.into_inner()).contains(chat_id)
    }

    pub fn add(&self, chat_id: &str) {
        let mut chats = self.chats.lock().unwrap_or_else(|e| e.into_inner());
        if chats.insert(chat_id.to_string()) {
            self.save(&chats);
        }
    }

    pub fn remove(&self, chat_id: &str) {
        let mut chats = self.chats.lock().unwrap_or_else(|e| e.into_inner());
        if chats.remove(chat_id) {
            self.save(&chats);
        }
    }

    fn save(&self, chats: &BTreeSet<String>) {
        if let Err(e) = write_json(&self.path, chats) {
            error!("Failed to save ignore list: {e}");
        }
    }
}
