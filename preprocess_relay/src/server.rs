use crate::config::Config;
use crate::relay::{InferenceBackend, PreprocessingRelay};
use infer_proto::{
    GrpcInferenceService, GrpcInferenceServiceServer, ModelInferRequest, ModelInferResponse,
};
use std::sync::Arc;
use tokio::signal;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tonic::{async_trait, Request, Response, Status};

/// The hosting runtime surface: exposes any `InferenceBackend` over the gRPC
/// inference protocol, driving it one batch per incoming request.
pub struct BackendService<B: InferenceBackend> {
    backend: Arc<B>,
}

impl<B: InferenceBackend> BackendService<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }
}

#[async_trait]
impl<B: InferenceBackend> GrpcInferenceService for BackendService<B> {
    async fn model_infer(
        &self,
        request: Request<ModelInferRequest>,
    ) -> Result<Response<ModelInferResponse>, Status> {
        let mut results = self.backend.execute(vec![request.into_inner()]).await;
        match results.pop() {
            Some(result) => result.map(Response::new),
            None => Err(Status::internal("backend returned no result for request")),
        }
    }
}

pub struct GrpcServer {
    router: Router,
    addr: String,
}

impl GrpcServer {
    pub fn new(backend: impl InferenceBackend, addr: &str) -> Self {
        let backend_service = BackendService::new(backend);
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(infer_proto::FILE_DESCRIPTOR_SET)
            .build_v1alpha()
            .unwrap();
        let router = Server::builder()
            .add_service(GrpcInferenceServiceServer::new(backend_service))
            .add_service(reflection_service);

        Self {
            router,
            addr: addr.to_string(),
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.addr.parse().expect("failed to parse address");

        tracing::info!("Preprocessing relay listening on {}", self.addr);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        self.router.serve_with_shutdown(addr, shutdown).await?;
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let relay = PreprocessingRelay::initialize(&config.downstream).await?;

    let addr = config.server.get_address();
    let grpc_server = GrpcServer::new(relay, &addr);

    grpc_server.run().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infer_proto::model_infer_response::InferOutputTensor;
    use infer_proto::tensor::DATATYPE_FP32;

    struct MockBackend {}

    #[async_trait]
    impl InferenceBackend for MockBackend {
        async fn execute(
            &self,
            batch: Vec<ModelInferRequest>,
        ) -> Vec<Result<ModelInferResponse, Status>> {
            batch
                .into_iter()
                .map(|request| {
                    Ok(ModelInferResponse {
                        model_name: request.model_name,
                        outputs: vec![InferOutputTensor {
                            name: "OUTPUT".to_string(),
                            datatype: DATATYPE_FP32.to_string(),
                            shape: vec![1, 1],
                            parameters: Default::default(),
                            contents: None,
                        }],
                        raw_output_contents: vec![1.0f32.to_le_bytes().to_vec()],
                        ..Default::default()
                    })
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn model_infer_drives_the_backend() {
        let service = BackendService::new(MockBackend {});

        let request = Request::new(ModelInferRequest {
            model_name: "image_relay".to_string(),
            ..Default::default()
        });
        let response = service.model_infer(request).await.unwrap().into_inner();

        assert_eq!(response.model_name, "image_relay");
        assert_eq!(response.outputs.len(), 1);
        assert_eq!(response.outputs[0].name, "OUTPUT");
    }
}
