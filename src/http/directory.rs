//! Stream directory: `GET /` lists every relayed camera.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::relay::{ConnectorState, SessionHandle};

/// One configured stream as exposed by the directory.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub path: String,
    pub source: String,
    pub session: SessionHandle,
}

#[derive(Debug, Serialize)]
pub struct RouteListing {
    pub routes: Vec<RouteSummary>,
}

#[derive(Debug, Serialize)]
pub struct RouteSummary {
    pub name: String,
    pub path: String,
    pub source: String,
    pub state: ConnectorState,
    pub viewers: usize,
}

/// Snapshot every stream's status.
pub fn listing(entries: &[DirectoryEntry]) -> RouteListing {
    let routes = entries
        .iter()
        .map(|entry| {
            let status = entry.session.status();
            RouteSummary {
                name: entry.session.name().to_string(),
                path: entry.path.clone(),
                source: entry.source.clone(),
                state: status.state,
                viewers: status.viewers,
            }
        })
        .collect();
    RouteListing { routes }
}

pub async fn directory_handler(State(entries): State<Arc<Vec<DirectoryEntry>>>) -> Json<RouteListing> {
    Json(listing(&entries))
}
