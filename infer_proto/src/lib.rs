pub mod tensor;

pub mod inference {
    tonic::include_proto!("inference");
}

pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("inference_descriptor");

pub use inference::grpc_inference_service_client::GrpcInferenceServiceClient;
pub use inference::grpc_inference_service_server::{
    GrpcInferenceService, GrpcInferenceServiceServer,
};
pub use inference::{
    infer_parameter, model_infer_request, model_infer_response, InferParameter,
    InferTensorContents, ModelInferRequest, ModelInferResponse,
};
