//! 文件共享服务器生命周期
//!
//! # 状态
//!
//! `running` 为 `Some` 当且仅当监听器已绑定且后台服务任务在运行。
//! start / stop / is_running 都在同一把锁下执行，状态转换不会交错。
//!
//! # 异常退出
//!
//! 后台任务如果不是因为 stop 而结束，会通过弱引用回到 [`ShareServer`] 的状态里，
//! 在代号（generation）仍匹配时把 `running` 清空。
//!
//! # 超时
//!
//! - 请求头: hyper 的 `header_read_timeout`（`read`）
//! - 请求体: `RequestBodyTimeoutLayer`（`read`）
//! - 处理器: `TimeoutLayer`（`write`，超时返回 408）
//! - 响应写出与空闲连接: [`DeadlineIo`]（`write` / `idle`）

use log::{debug, error, info, warn};

use crate::net::resolve_local_ipv4;
use crate::share::deadline::DeadlineIo;
use crate::share::{SHUTDOWN_GRACE, ServerTimeouts, ShareError, ShareProtocol, WebDav};
use axum::Router;
use axum::extract::Request;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceBuilder};
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;

struct RunningServer {
    generation: u64,
    local_addr: SocketAddr,
    /// 取消后后台任务关闭监听器并优雅结束所有连接
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

#[derive(Default)]
struct ServerState {
    running: Option<RunningServer>,
    generation: u64,
}

/// 局域网文件共享服务器
pub struct ShareServer {
    root: PathBuf,
    timeouts: ServerTimeouts,
    protocol: Arc<dyn ShareProtocol>,
    state: Arc<Mutex<ServerState>>,
}

impl ShareServer {
    /// 创建服务器；共享目录不存在时会被创建
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);

        if let Err(e) = std::fs::create_dir_all(&root) {
            warn!("Failed to create share root {:?}: {}", root, e);
        }

        Self {
            root,
            timeouts: ServerTimeouts::default(),
            protocol: Arc::new(WebDav),
            state: Arc::new(Mutex::new(ServerState::default())),
        }
    }

    /// 使用 `<cwd>/shared` 作为共享目录
    pub fn with_default_root() -> Self {
        Self::new(crate::share::default_share_root())
    }

    /// 替换文件协议引擎
    #[must_use]
    pub fn with_protocol(mut self, protocol: Arc<dyn ShareProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    /// 替换超时设置，对之后的 `start` 生效
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running.is_some()
    }

    /// 运行中时返回实际绑定的地址
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.running.as_ref().map(|r| r.local_addr)
    }

    /// 在 `port` 上启动服务器（0 表示由系统分配），返回局域网可访问的 `host:port`
    pub async fn start(&self, port: u16) -> Result<String, ShareError> {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            return Err(ShareError::AlreadyRunning);
        }

        let router = self.build_router();

        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ShareError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ShareError::Bind {
            addr: bind_addr,
            source,
        })?;

        self.launch(&mut state, listener, router, local_addr);

        let host = resolve_local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST);
        let reachable = format!("{}:{}", host, local_addr.port());
        info!(
            "Share server listening on {} (reachable at {}), root={:?}",
            local_addr, reachable, self.root
        );
        Ok(reachable)
    }

    /// 优雅停止服务器；未运行时什么也不做
    pub async fn stop(&self) -> Result<(), ShareError> {
        let mut state = self.state.lock().await;
        let Some(running) = state.running.take() else {
            debug!("Share server not running, nothing to stop");
            return Ok(());
        };

        info!("Stopping share server on {}", running.local_addr);
        running.shutdown.cancel();

        let mut task = running.task;
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await {
            Ok(Ok(Ok(()))) => {
                info!("Share server stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(ShareError::Shutdown(e.to_string())),
            Ok(Err(e)) => Err(ShareError::Shutdown(e.to_string())),
            Err(_) => {
                warn!(
                    "Share server did not stop within {}s, aborting connections",
                    SHUTDOWN_GRACE.as_secs()
                );
                task.abort();
                Err(ShareError::Shutdown(format!(
                    "grace period of {}s exceeded",
                    SHUTDOWN_GRACE.as_secs()
                )))
            }
        }
    }

    /// 启动后台服务任务并记录为当前运行；调用方持有状态锁
    fn launch<A: Acceptor>(
        &self,
        state: &mut ServerState,
        acceptor: A,
        router: Router,
        local_addr: SocketAddr,
    ) {
        state.generation += 1;
        let generation = state.generation;
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_server(
            acceptor,
            router,
            self.timeouts,
            shutdown.clone(),
            Arc::downgrade(&self.state),
            generation,
        ));

        state.running = Some(RunningServer {
            generation,
            local_addr,
            shutdown,
            task,
        });
    }

    fn build_router(&self) -> Router {
        self.protocol.router(&self.root).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(self.timeouts.write))
                .layer(RequestBodyTimeoutLayer::new(self.timeouts.read)),
        )
    }
}

/// 连接来源
#[async_trait::async_trait]
trait Acceptor: Send + 'static {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn accept(&mut self) -> io::Result<(Self::Conn, SocketAddr)>;
}

#[async_trait::async_trait]
impl Acceptor for TcpListener {
    type Conn = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

async fn run_server<A: Acceptor>(
    listener: A,
    router: Router,
    timeouts: ServerTimeouts,
    shutdown: CancellationToken,
    state: Weak<Mutex<ServerState>>,
    generation: u64,
) -> io::Result<()> {
    let result = accept_loop(listener, router, timeouts, shutdown).await;
    if let Err(e) = &result {
        error!("Share server error: {}", e);
        // stop() 可能正持有锁并等待本任务结束，所以在独立任务里回写状态
        tokio::spawn(reset_after_failure(state, generation));
    }
    result
}

async fn reset_after_failure(state: Weak<Mutex<ServerState>>, generation: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = state.lock().await;
    if state
        .running
        .as_ref()
        .is_some_and(|r| r.generation == generation)
    {
        warn!("Share server exited unexpectedly, marking as stopped");
        state.running = None;
    }
}

async fn accept_loop<A: Acceptor>(
    mut listener: A,
    router: Router,
    timeouts: ServerTimeouts,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let mut connections = JoinSet::new();

    let result = loop {
        tokio::select! {
            () = shutdown.cancelled() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    connections.spawn(serve_connection(
                        stream,
                        router.clone(),
                        timeouts,
                        shutdown.clone(),
                    ));
                }
                Err(e) if is_connection_error(&e) => {
                    debug!("Accept failed: {}", e);
                }
                Err(e) => break Err(e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    };

    // 先关闭监听器，不再接受新连接
    drop(listener);

    match result {
        Ok(()) => {
            debug!("Waiting for {} connection(s) to finish", connections.len());
            while connections.join_next().await.is_some() {}
            Ok(())
        }
        Err(e) => {
            // 已建立的连接继续优雅收尾
            shutdown.cancel();
            connections.detach_all();
            Err(e)
        }
    }
}

async fn serve_connection<S>(
    stream: S,
    router: Router,
    timeouts: ServerTimeouts,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |request: Request<Incoming>| {
        router.clone().call(request)
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.read);

    let io = DeadlineIo::new(stream, timeouts.write, timeouts.idle);
    let conn = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!("Connection closed with error: {}", e);
                }
                break;
            }
            () = shutdown.cancelled(), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// 第一次 accept 就返回不可恢复的错误
    struct BrokenListener;

    #[async_trait::async_trait]
    impl Acceptor for BrokenListener {
        type Conn = TcpStream;

        async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    async fn wait_until_stopped(server: &ShareServer) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.is_running().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server state was not reset");
    }

    #[tokio::test]
    async fn test_accept_failure_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let server = ShareServer::new(dir.path());

        {
            let mut state = server.state.lock().await;
            let router = server.build_router();
            let addr = SocketAddr::from(([127, 0, 0, 1], 9));
            server.launch(&mut state, BrokenListener, router, addr);
            assert!(state.running.is_some());
        }

        wait_until_stopped(&server).await;
        assert!(server.local_addr().await.is_none());

        // 复位后可以重新启动，stop 也不会报告旧任务的错误
        server.start(0).await.unwrap();
        assert!(server.is_running().await);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_failure_keeps_open_connections() {
        let (stream, _peer) = tokio::io::duplex(1024);
        let shutdown = CancellationToken::new();

        struct OnceThenBroken(Option<tokio::io::DuplexStream>);

        #[async_trait::async_trait]
        impl Acceptor for OnceThenBroken {
            type Conn = tokio::io::DuplexStream;

            async fn accept(&mut self) -> io::Result<(Self::Conn, SocketAddr)> {
                match self.0.take() {
                    Some(conn) => Ok((conn, SocketAddr::from(([127, 0, 0, 1], 1)))),
                    None => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
                }
            }
        }

        let err = accept_loop(
            OnceThenBroken(Some(stream)),
            Router::new(),
            ServerTimeouts::default(),
            shutdown.clone(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        // 已建立的连接收到关闭信号，转入优雅收尾
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_stale_failure_does_not_reset_new_run() {
        let dir = tempfile::tempdir().unwrap();
        let server = ShareServer::new(dir.path());

        server.start(0).await.unwrap();
        server.stop().await.unwrap();
        server.start(0).await.unwrap();

        // 第一次运行的代号是 1
        reset_after_failure(Arc::downgrade(&server.state), 1).await;
        assert!(server.is_running().await);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_after_server_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let server = ShareServer::new(dir.path());
        let weak = Arc::downgrade(&server.state);
        drop(server);
        reset_after_failure(weak, 1).await;
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(is_connection_error(&io::Error::from(
            io::ErrorKind::ConnectionReset
        )));
        assert!(!is_connection_error(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
