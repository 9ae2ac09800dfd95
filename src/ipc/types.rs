use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::billing::Clock;
use crate::checkout::CheckoutFlow;
use crate::config::Config;
use crate::ipc::error::HandlerErr;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub checkout: CheckoutFlow,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            checkout: CheckoutFlow::default(),
        }
    }

    pub fn conn(&self) -> Result<&Connection, HandlerErr> {
        self.db
            .as_ref()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
    }

    pub fn clock(&self) -> Clock {
        Clock {
            now: chrono::Utc::now(),
            grace_days: self.config.grace_days,
        }
    }
}
