//! Shared loopback harness for integration tests that need a live
//! `AgentService` server without going through a real network deployment.
//!
//! Both `stfleet-session-manager` (server-side) and `stfleet-agent`
//! (client-side) integration tests bind an in-process tonic server on
//! `127.0.0.1:0` and connect a real gRPC channel to it; this avoids mocking
//! the transport while keeping tests hermetic and parallel-safe.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tonic::transport::server::Router;

/// A running in-process gRPC server plus the address clients should dial.
pub struct LoopbackServer {
    /// The address the server is listening on.
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl LoopbackServer {
    /// Binds `router` to an ephemeral localhost port and serves it on a
    /// background task until the returned handle is aborted or dropped.
    pub async fn spawn(router: Router) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let incoming = tokio_stream::wrappers::TcpListenerStream::new(listener);
        let handle = tokio::spawn(async move {
            let _ = router.serve_with_incoming(incoming).await;
        });
        Ok(Self { addr, handle })
    }

    /// The `http://` URL clients should connect a `tonic::transport::Channel`
    /// to.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
