//! Grouped sink registry
//!
//! Maps each application id to its sink group: at most one dump sink, a
//! set of syslog sinks keyed by drain URL, and the connected websocket
//! subscribers. The router task is the only writer.

use std::collections::HashMap;
use std::sync::Arc;

use weir_sinks::{DumpBuffer, SinkHandle, SinkKind, SinkRef};

/// Per-process sink registry, keyed by application id
#[derive(Debug, Default)]
pub struct GroupedSinks {
    groups: HashMap<String, SinkGroup>,
}

#[derive(Debug, Default)]
struct SinkGroup {
    dump: Option<SinkHandle>,
    drains: HashMap<String, SinkHandle>,
    websockets: Vec<SinkHandle>,
}

impl SinkGroup {
    fn is_empty(&self) -> bool {
        self.dump.is_none() && self.drains.is_empty() && self.websockets.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = &SinkHandle> {
        self.dump
            .iter()
            .chain(self.drains.values())
            .chain(self.websockets.iter())
    }
}

impl GroupedSinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a sink handle.
    ///
    /// Returns `false` without inserting when a same-identity sink already
    /// exists: a second dump for the app, a duplicate drain URL, or a
    /// duplicate subscriber identifier.
    pub fn register(&mut self, handle: SinkHandle) -> bool {
        let group = self.groups.entry(handle.app_id().to_owned()).or_default();
        match handle.kind() {
            SinkKind::Dump => {
                if group.dump.is_some() {
                    return false;
                }
                group.dump = Some(handle);
            }
            SinkKind::Syslog => {
                if group.drains.contains_key(handle.identifier()) {
                    return false;
                }
                group.drains.insert(handle.identifier().to_owned(), handle);
            }
            SinkKind::Websocket => {
                if group
                    .websockets
                    .iter()
                    .any(|ws| ws.identifier() == handle.identifier())
                {
                    return false;
                }
                group.websockets.push(handle);
            }
        }
        true
    }

    /// Remove a sink, handing its handle back to the caller.
    ///
    /// Dropping the returned handle is what closes the sink's channel.
    pub fn delete(&mut self, sink: &SinkRef) -> Option<SinkHandle> {
        let group = self.groups.get_mut(&sink.app_id)?;
        let removed = match sink.kind {
            SinkKind::Dump => group
                .dump
                .take_if(|dump| dump.identifier() == sink.identifier),
            SinkKind::Syslog => group.drains.remove(&sink.identifier),
            SinkKind::Websocket => {
                let index = group
                    .websockets
                    .iter()
                    .position(|ws| ws.identifier() == sink.identifier)?;
                Some(group.websockets.swap_remove(index))
            }
        };

        if group.is_empty() {
            self.groups.remove(&sink.app_id);
        }
        removed
    }

    /// Every sink registered for `app_id`
    pub fn for_app<'a>(&'a self, app_id: &str) -> impl Iterator<Item = &'a SinkHandle> {
        self.groups.get(app_id).into_iter().flat_map(SinkGroup::iter)
    }

    /// The app's dump ring, if a dump sink exists
    pub fn dump_for(&self, app_id: &str) -> Option<Arc<DumpBuffer>> {
        self.groups
            .get(app_id)?
            .dump
            .as_ref()
            .and_then(SinkHandle::dump_buffer)
    }

    /// Identifiers (drain URLs) of the app's registered syslog sinks
    pub fn drain_identifiers(&self, app_id: &str) -> Vec<String> {
        self.groups
            .get(app_id)
            .map(|group| group.drains.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The app's syslog sink for one drain URL
    pub fn drain_for(&self, app_id: &str, drain_url: &str) -> Option<&SinkHandle> {
        self.groups.get(app_id)?.drains.get(drain_url)
    }

    /// Number of apps with at least one sink
    pub fn app_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
#[path = "grouped_test.rs"]
mod tests;
