//! RPC server: accept loop and per-connection request handling.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufWriter;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::codec;
use super::message::{Call, Data, FrameData, Reply, RequestHeader, ResponseHeader};
use crate::error::Result;

/// Handlers for the three pipeline calls. A service implements only the
/// calls it serves; the rest answer with an error reply.
pub trait PipelineService: Send + Sync + 'static {
    fn register_source(&self, request: Data) -> impl Future<Output = Reply> + Send {
        let _ = request;
        async { Reply::unimplemented("RegisterSource") }
    }

    fn submit_frame(&self, request: FrameData) -> impl Future<Output = Reply> + Send {
        let _ = request;
        async { Reply::unimplemented("SubmitFrame") }
    }

    fn submit_detections(&self, request: FrameData) -> impl Future<Output = Reply> + Send {
        let _ = request;
        async { Reply::unimplemented("SubmitDetections") }
    }
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}

/// Serve `service` on `listener` until `shutdown` resolves.
pub async fn serve<S, F>(listener: TcpListener, service: Arc<S>, shutdown: F) -> Result<()>
where
    S: PipelineService,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("rpc server stopping");
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(handle_connection(stream, peer, service.clone()));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }
}

async fn handle_connection<S: PipelineService>(stream: TcpStream, peer: SocketAddr, service: Arc<S>) {
    let _ = stream.set_nodelay(true);
    debug!(%peer, "connection opened");
    let (mut read_half, write_half) = stream.into_split();

    let (tx, mut rx) = mpsc::channel::<ResponseHeader>(64);
    let writer = tokio::spawn(async move {
        let mut writer = BufWriter::new(write_half);
        while let Some(response) = rx.recv().await {
            if let Err(e) = codec::write_message(&mut writer, &response, &[]).await {
                debug!(%peer, "reply write failed: {e}");
                break;
            }
        }
    });

    loop {
        match codec::read_message::<_, RequestHeader>(&mut read_half).await {
            Ok(Some((header, body))) => {
                let service = service.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let reply = dispatch(service.as_ref(), header.call, body).await;
                    let _ = tx.send(ResponseHeader { id: header.id, reply }).await;
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, "dropping connection: {e}");
                break;
            }
        }
    }

    drop(tx);
    let _ = writer.await;
    debug!(%peer, "connection closed");
}

async fn dispatch<S: PipelineService>(service: &S, call: Call, body: Vec<u8>) -> Reply {
    match call {
        Call::RegisterSource(data) => service.register_source(data).await,
        Call::SubmitFrame(header) => service.submit_frame(FrameData::new(header, body)).await,
        Call::SubmitDetections(header) => service.submit_detections(FrameData::new(header, body)).await,
    }
}
