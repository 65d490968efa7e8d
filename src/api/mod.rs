mod error;
mod handlers;
mod middleware;
mod rate_limit;
mod request_id;
mod response;
mod router;

use hyper::header::{self, HeaderValue};
use hyper::server::conn::AddrStream;
use hyper::service::make_service_fn;
use hyper::{Body, Request, Response};
use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::limit::{self, RequestBodyLimitLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info, warn};

use rate_limit::RateLimiter;

use crate::config::Config;
use crate::datastore::TaskStorage;

/// Everything a request handler can reach.
pub struct AppState<S> {
    pub storage: Arc<S>,
    pub config: Config,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: Instant,
}

impl<S: TaskStorage> AppState<S> {
    pub fn new(config: Config, storage: Arc<S>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.clone(),
            config.is_development(),
        ));
        Self {
            storage,
            config,
            rate_limiter,
            started_at: Instant::now(),
        }
    }
}

/// A request body capped at `listen.max_body_bytes`.
pub type RequestBody = http_body::Limited<Body>;

type ApiService =
    BoxCloneService<Request<Body>, Response<limit::ResponseBody<Body>>, Infallible>;

/// The per-connection service: security headers, body limit and CORS
/// around the request pipeline in `middleware::handle`.
pub fn app_service<S: TaskStorage>(state: Arc<AppState<S>>, remote: SocketAddr) -> ApiService {
    ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(RequestBodyLimitLayer::new(state.config.listen.max_body_bytes))
        .layer(middleware::cors_layer(&state.config.cors))
        .service_fn(move |req: Request<RequestBody>| {
            let state = state.clone();
            async move { Ok::<_, Infallible>(middleware::handle(state, remote, req).await) }
        })
        .boxed_clone()
}

pub struct Server<S> {
    state: Arc<AppState<S>>,
}

impl<S: TaskStorage> Server<S> {
    pub fn new(config: Config, storage: Arc<S>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, storage)),
        }
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// let in-flight requests finish.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "Starting api...");

        if self.state.config.rate_limit.enabled {
            tokio::spawn(self.state.rate_limiter.clone().run_cleanup());
        }

        let state = self.state;
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let state = state.clone();
            let remote = conn.remote_addr();
            async move { Ok::<_, Infallible>(app_service(state, remote)) }
        });

        hyper::Server::from_tcp(listener)?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|err| {
                error!(reason = %err, "Unable to run API.");
                anyhow::anyhow!(err)
            })?;

        info!("api stopped");
        Ok(())
    }
}

/// The api server and the runtime it runs on.
pub struct ApiRuntime {
    runtime: Runtime,
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<()>,
}

impl ApiRuntime {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait up to `timeout` for in-flight
    /// requests before tearing the runtime down.
    pub fn stop(self, timeout: Duration) {
        let ApiRuntime {
            runtime,
            shutdown,
            server,
            ..
        } = self;

        if shutdown.send(()).is_err() {
            warn!("api server already stopped");
        }
        match runtime.block_on(async move { tokio::time::timeout(timeout, server).await }) {
            Ok(Ok(())) => info!("api drained"),
            Ok(Err(err)) => error!(reason = %err, "api task failed"),
            Err(_) => warn!(?timeout, "api did not drain in time, forcing shutdown"),
        }
        runtime.shutdown_timeout(Duration::from_millis(100));
    }
}

pub fn build_runtime<S: TaskStorage>(cfg: Config, storage: Arc<S>) -> anyhow::Result<ApiRuntime> {
    let runtime = Builder::new_multi_thread()
        .thread_name("http-api")
        .enable_all()
        .build()?;

    let listener = TcpListener::bind(cfg.server_address())?;
    let local_addr = listener.local_addr()?;
    let (shutdown, rx_shutdown) = oneshot::channel::<()>();

    let api = Server::new(cfg, storage);
    let server = runtime.spawn(async move {
        let signal = async {
            rx_shutdown.await.ok();
        };
        if let Err(err) = api.serve(listener, signal).await {
            error!(reason = %err, "api exited with error");
        }
    });

    Ok(ApiRuntime {
        runtime,
        local_addr,
        shutdown,
        server,
    })
}
