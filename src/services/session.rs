//! Per-server session state.
//!
//! Holds the active project pointer and the landing-page flag explicitly
//! instead of hiding them in process-wide globals. One instance is built
//! in `main` and shared by the router and the supervisor.

use tokio::sync::RwLock;

pub struct Session {
    active_project: RwLock<Option<String>>,
    landing_shown: std::sync::atomic::AtomicBool,
    read_only: bool,
}

impl Session {
    pub fn new(read_only: bool) -> Self {
        Self {
            active_project: RwLock::new(None),
            landing_shown: std::sync::atomic::AtomicBool::new(false),
            read_only,
        }
    }

    pub async fn active_project(&self) -> Option<String> {
        self.active_project.read().await.clone()
    }

    pub async fn set_active_project(&self, project_id: Option<String>) {
        *self.active_project.write().await = project_id;
    }

    /// True exactly once: the first caller observes a pending landing page
    /// and every later caller does not.
    pub fn take_landing_pending(&self) -> bool {
        !self
            .landing_shown
            .swap(true, std::sync::atomic::Ordering::AcqRel)
    }

    pub fn landing_shown(&self) -> bool {
        self.landing_shown.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }
}
