use infer_proto::{GrpcInferenceServiceClient, ModelInferRequest, ModelInferResponse};
use thiserror::Error;
use tokio::sync::Mutex;
use tonic::{async_trait, transport::Channel, Request, Status};

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("failed to connect to downstream inference server: {0}")]
    ConnectionFailed(#[from] tonic::transport::Error),
}

/// The second-hop inference server the relay forwards to.
#[async_trait]
pub trait Downstream: Send + Sync + 'static {
    async fn infer(&self, request: ModelInferRequest) -> Result<ModelInferResponse, Status>;
}

/// The one retained connection handle, opened once at backend initialization
/// and reused across batches. The mutex serializes access so concurrent
/// requests from the hosting runtime never race on the client.
pub struct GrpcDownstream {
    client: Mutex<GrpcInferenceServiceClient<Channel>>,
}

impl GrpcDownstream {
    pub async fn connect(address: String) -> Result<Self, DownstreamError> {
        tracing::info!("connecting to downstream inference server at {}", address);
        let client = GrpcInferenceServiceClient::connect(address).await?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }

    /// Drops the channel. Provided so owners can end the connection's
    /// lifecycle explicitly rather than by letting the handle fall out of
    /// scope.
    pub fn close(self) {}
}

#[async_trait]
impl Downstream for GrpcDownstream {
    async fn infer(&self, request: ModelInferRequest) -> Result<ModelInferResponse, Status> {
        let mut client = self.client.lock().await;
        let response = client.model_infer(Request::new(request)).await?;
        Ok(response.into_inner())
    }
}
