//! SQLite persistence: connection management and store implementations.

pub mod connection;
pub mod engine_repo;
pub mod event_repo;
pub mod scenario_repo;
pub mod template_repo;
pub mod utils;

pub use connection::DatabaseConnection;
pub use engine_repo::EngineRepository;
pub use event_repo::EventRepository;
pub use scenario_repo::ScenarioRepository;
pub use template_repo::TemplateRepository;
