//! Generated `AgentService` gRPC bindings.
//!
//! The single proto package (`stfleet.agent.v1`) covers the whole
//! agent-to-control-plane wire contract: registration, heartbeat, and the
//! bidirectional command stream.

pub mod agent {
    pub mod v1 {
        include!("gen/stfleet.agent.v1.rs");

        pub use agent_service_client::AgentServiceClient;
        pub use agent_service_server::{AgentService, AgentServiceServer};
    }
}
