use std::{convert::Infallible, io, net::SocketAddr, pin::pin, sync::Arc};

use hyper::{
    body::Incoming, server::conn::http1::Builder as HyperHttpBuilder, service::service_fn, Request,
};
use hyper_util::rt::TokioIo;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::routes::{self, State};

/// A bound aggregation server.
///
/// Created by [`ServerBuilder`](crate::ServerBuilder). Nothing is accepted until
/// [`serve`](Server::serve) runs.
pub struct Server {
    listener: std::net::TcpListener,
    local_addr: SocketAddr,
    state: Arc<State>,
}

impl Server {
    pub(crate) fn new(
        listener: std::net::TcpListener,
        local_addr: SocketAddr,
        state: Arc<State>,
    ) -> Self {
        Self { listener, local_addr, state }
    }

    /// Returns the address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// On shutdown the listener is closed, and open connections finish their current request
    /// before the call returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be registered with the runtime.
    pub async fn serve(self, shutdown: CancellationToken) -> io::Result<()> {
        let listener = TcpListener::from_std(self.listener)?;
        info!(address = %self.local_addr, "Server listening.");

        let mut connections = JoinSet::new();
        loop {
            let (stream, remote) = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Error accepting connection. Ignoring request.");
                        continue;
                    }
                },
            };

            while let Some(result) = connections.try_join_next() {
                log_join_result(result);
            }
            connections.spawn(serve_connection(
                stream,
                remote,
                Arc::clone(&self.state),
                shutdown.clone(),
            ));
        }

        drop(listener);
        debug!(open = connections.len(), "Waiting for open connections.");
        while let Some(result) = connections.join_next().await {
            log_join_result(result);
        }

        info!("Server stopped.");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    state: Arc<State>,
    shutdown: CancellationToken,
) {
    let service = service_fn(move |request: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { Ok::<_, Infallible>(routes::handle(&state, remote, request).await) }
    });

    let mut connection =
        pin!(HyperHttpBuilder::new().serve_connection(TokioIo::new(stream), service));
    let result = tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.cancelled() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    };

    if let Err(e) = result {
        warn!(error = %e, %remote, "Error serving connection.");
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Connection task failed.");
    }
}
