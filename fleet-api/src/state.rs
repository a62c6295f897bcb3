use fleet_orchestrator::Fleet;

#[derive(Clone)]
pub struct AppState {
    pub fleet: Fleet,
}

impl AppState {
    pub fn new(fleet: Fleet) -> Self {
        Self { fleet }
    }
}
