//! In-memory pane backend for tests
//!
//! Records every launch, sent text and key per pane. Panes can be killed
//! "externally" to simulate a crashed worker, and send/split failures can be
//! injected to exercise retry and rollback paths.

use crate::manager::{LaunchSpec, PaneManager, SessionLayout};
use crate::tmux::session_name_for;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use team_foundation::{Error, Result};

/// One recorded pane
#[derive(Debug, Clone, Default)]
pub struct MockPane {
    pub id: String,
    pub session: String,
    pub alive: bool,
    pub launched: Option<LaunchSpec>,
    pub sent: Vec<String>,
    pub keys: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u32,
    /// session -> pane ids in creation order (leader first)
    sessions: BTreeMap<String, Vec<String>>,
    panes: BTreeMap<String, MockPane>,
    killed: Vec<String>,
    failing_sends: HashSet<String>,
    fail_all_sends: bool,
    fail_splits: bool,
    layouts: u32,
}

impl MockState {
    fn new_pane(&mut self, session: &str) -> String {
        self.next_id += 1;
        let id = format!("%{}", self.next_id);
        self.panes.insert(
            id.clone(),
            MockPane {
                id: id.clone(),
                session: session.to_string(),
                alive: true,
                ..Default::default()
            },
        );
        self.sessions
            .entry(session.to_string())
            .or_default()
            .push(id.clone());
        id
    }

    fn send_blocked(&self, pane_id: &str) -> bool {
        self.fail_all_sends || self.failing_sends.contains(pane_id)
    }
}

/// Pane manager that never touches a terminal
#[derive(Debug, Default)]
pub struct MockPaneManager {
    state: Mutex<MockState>,
}

impl MockPaneManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an existing session with a leader pane, as if created earlier
    pub fn add_session(&self, session_name: &str) -> String {
        self.state.lock().new_pane(session_name)
    }

    /// Register a pane in an existing session
    pub fn add_pane(&self, session_name: &str) -> String {
        self.state.lock().new_pane(session_name)
    }

    /// Mark a pane dead without going through `kill_pane`
    pub fn kill_externally(&self, pane_id: &str) {
        if let Some(pane) = self.state.lock().panes.get_mut(pane_id) {
            pane.alive = false;
        }
    }

    /// Make every `send_text`/`send_key` fail (or succeed again)
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_all_sends = fail;
    }

    /// Make sends to one pane fail
    pub fn fail_sends_to(&self, pane_id: &str) {
        self.state.lock().failing_sends.insert(pane_id.to_string());
    }

    /// Make `split_pane` fail
    pub fn fail_splits(&self, fail: bool) {
        self.state.lock().fail_splits = fail;
    }

    pub fn pane(&self, pane_id: &str) -> Option<MockPane> {
        self.state.lock().panes.get(pane_id).cloned()
    }

    pub fn sent_text(&self, pane_id: &str) -> Vec<String> {
        self.pane(pane_id).map(|p| p.sent).unwrap_or_default()
    }

    pub fn sent_keys(&self, pane_id: &str) -> Vec<String> {
        self.pane(pane_id).map(|p| p.keys).unwrap_or_default()
    }

    pub fn launched(&self, pane_id: &str) -> Option<LaunchSpec> {
        self.pane(pane_id).and_then(|p| p.launched)
    }

    /// Panes that were explicitly killed, in order
    pub fn killed_panes(&self) -> Vec<String> {
        self.state.lock().killed.clone()
    }

    /// Whether the session still exists
    pub fn session_alive(&self, session_name: &str) -> bool {
        self.state.lock().sessions.contains_key(session_name)
    }

    /// Panes of a session that are still alive
    pub fn live_panes(&self, session_name: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .sessions
            .get(session_name)
            .map(|ids| {
                ids.iter()
                    .filter(|id| state.panes.get(*id).map(|p| p.alive).unwrap_or(false))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of layout normalizations requested
    pub fn layout_count(&self) -> u32 {
        self.state.lock().layouts
    }
}

#[async_trait]
impl PaneManager for MockPaneManager {
    async fn create_session(
        &self,
        team_name: &str,
        initial_pane_count: usize,
        _cwd: &Path,
    ) -> Result<SessionLayout> {
        let session_name = session_name_for(team_name);
        let mut state = self.state.lock();
        if state.sessions.contains_key(&session_name) {
            return Err(Error::pane(
                "new-session",
                format!("duplicate session: {}", session_name),
            ));
        }
        let leader_pane_id = state.new_pane(&session_name);
        let worker_pane_ids = (0..initial_pane_count)
            .map(|_| state.new_pane(&session_name))
            .collect();
        Ok(SessionLayout {
            session_name,
            leader_pane_id,
            worker_pane_ids,
        })
    }

    async fn split_pane(&self, target: &str, _cwd: &Path) -> Result<String> {
        let mut state = self.state.lock();
        if state.fail_splits {
            return Err(Error::pane("split-window", "injected split failure"));
        }
        let session = match state.panes.get(target) {
            Some(pane) => pane.session.clone(),
            None => {
                return Err(Error::pane(
                    "split-window",
                    format!("can't find pane: {}", target),
                ))
            }
        };
        Ok(state.new_pane(&session))
    }

    async fn normalize_layout(&self, _session_name: &str) -> Result<()> {
        self.state.lock().layouts += 1;
        Ok(())
    }

    async fn launch(&self, pane_id: &str, spec: &LaunchSpec) -> Result<()> {
        let mut state = self.state.lock();
        match state.panes.get_mut(pane_id) {
            Some(pane) => {
                pane.launched = Some(spec.clone());
                pane.alive = true;
                Ok(())
            }
            None => Err(Error::pane(
                "respawn-pane",
                format!("can't find pane: {}", pane_id),
            )),
        }
    }

    async fn send_text(&self, _session_name: &str, pane_id: &str, text: &str) -> bool {
        let mut state = self.state.lock();
        if state.send_blocked(pane_id) {
            return false;
        }
        match state.panes.get_mut(pane_id) {
            Some(pane) if pane.alive => {
                pane.sent.push(text.to_string());
                true
            }
            _ => false,
        }
    }

    async fn send_key(&self, pane_id: &str, key: &str) -> bool {
        let mut state = self.state.lock();
        if state.send_blocked(pane_id) {
            return false;
        }
        match state.panes.get_mut(pane_id) {
            Some(pane) if pane.alive => {
                pane.keys.push(key.to_string());
                true
            }
            _ => false,
        }
    }

    async fn is_alive(&self, pane_id: &str) -> bool {
        self.state
            .lock()
            .panes
            .get(pane_id)
            .map(|p| p.alive)
            .unwrap_or(false)
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(pane) = state.panes.get_mut(pane_id) {
            pane.alive = false;
        }
        state.killed.push(pane_id.to_string());
        Ok(())
    }

    async fn kill_session(
        &self,
        session_name: &str,
        pane_ids: &[String],
        leader_pane_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if session_name.starts_with(crate::tmux::SESSION_PREFIX) {
            let ids = state.sessions.remove(session_name).unwrap_or_default();
            for id in ids {
                if let Some(pane) = state.panes.get_mut(&id) {
                    pane.alive = false;
                }
                state.killed.push(id);
            }
            return Ok(());
        }

        for id in pane_ids.iter().filter(|p| p.as_str() != leader_pane_id) {
            if let Some(pane) = state.panes.get_mut(id) {
                pane.alive = false;
            }
            state.killed.push(id.clone());
        }
        Ok(())
    }

    async fn session_exists(&self, session_name: &str) -> bool {
        self.session_alive(session_name)
    }

    async fn list_panes(&self, session_name: &str) -> Result<Vec<String>> {
        if !self.session_alive(session_name) {
            return Err(Error::pane(
                "list-panes",
                format!("can't find session: {}", session_name),
            ));
        }
        Ok(self.live_panes(session_name))
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_session_and_split() {
        let mock = MockPaneManager::new();
        let layout = mock
            .create_session("alpha", 2, Path::new("/w"))
            .await
            .unwrap();
        assert_eq!(layout.session_name, "omc-team-alpha");
        assert_eq!(layout.leader_pane_id, "%1");
        assert_eq!(layout.worker_pane_ids, vec!["%2", "%3"]);

        let extra = mock.split_pane("%3", Path::new("/w")).await.unwrap();
        assert_eq!(extra, "%4");
        assert_eq!(
            mock.list_panes("omc-team-alpha").await.unwrap(),
            vec!["%1", "%2", "%3", "%4"]
        );
    }

    #[tokio::test]
    async fn test_send_requires_live_pane() {
        let mock = MockPaneManager::new();
        let layout = mock.create_session("b", 1, Path::new("/")).await.unwrap();
        let pane = &layout.worker_pane_ids[0];

        assert!(mock.send_text(&layout.session_name, pane, "hi").await);
        mock.kill_externally(pane);
        assert!(!mock.send_text(&layout.session_name, pane, "again").await);
        assert_eq!(mock.sent_text(pane), vec!["hi"]);
        assert!(!mock.is_alive(pane).await);
    }

    #[tokio::test]
    async fn test_injected_send_failure() {
        let mock = MockPaneManager::new();
        let layout = mock.create_session("c", 1, Path::new("/")).await.unwrap();
        let pane = &layout.worker_pane_ids[0];

        mock.fail_sends_to(pane);
        assert!(!mock.send_key(pane, "Enter").await);
        assert!(mock.sent_keys(pane).is_empty());
    }

    #[tokio::test]
    async fn test_kill_adopted_session_spares_leader() {
        let mock = MockPaneManager::new();
        let leader = mock.add_session("work:0");
        let worker = mock.add_pane("work:0");

        mock.kill_session("work:0", &[leader.clone(), worker.clone()], &leader)
            .await
            .unwrap();
        assert!(mock.is_alive(&leader).await);
        assert!(!mock.is_alive(&worker).await);
        assert_eq!(mock.killed_panes(), vec![worker]);
    }

    #[tokio::test]
    async fn test_kill_owned_session_removes_it() {
        let mock = MockPaneManager::new();
        let layout = mock.create_session("d", 1, Path::new("/")).await.unwrap();
        mock.kill_session(&layout.session_name, &[], &layout.leader_pane_id)
            .await
            .unwrap();
        assert!(!mock.session_exists(&layout.session_name).await);
    }
}
