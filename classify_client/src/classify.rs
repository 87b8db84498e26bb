use infer_proto::model_infer_request::InferRequestedOutputTensor;
use infer_proto::tensor::{
    classification_param, extract_output, InputTensor, OutputTensor, TensorError, TensorValues,
};
use infer_proto::{GrpcInferenceServiceClient, ModelInferRequest};
use thiserror::Error;
use tonic::Request;

pub const INPUT_NAME: &str = "INPUT";
pub const OUTPUT_NAME: &str = "OUTPUT";

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("failed to connect to inference server: {0}")]
    ConnectionFailed(#[from] tonic::transport::Error),
    #[error("inference request failed: {0}")]
    RequestFailed(#[from] tonic::Status),
    #[error("bad response: {0}")]
    BadResponse(#[from] TensorError),
    #[error("image byte buffer is empty")]
    EmptyImage,
    #[error("model name must not be empty")]
    EmptyModelName,
}

/// Wraps the encoded image bytes as the single `"INPUT"` tensor of a request
/// for `model_name`. `classes` above 1 asks the server to truncate the
/// classification output to the top-N classes.
pub fn build_request(model_name: &str, image_bytes: Vec<u8>, classes: i64) -> ModelInferRequest {
    let (input, raw) = InputTensor::from_bytes(INPUT_NAME, image_bytes).into_parts();

    let mut output = InferRequestedOutputTensor {
        name: OUTPUT_NAME.to_string(),
        parameters: Default::default(),
    };
    if classes > 1 {
        output
            .parameters
            .insert("classification".to_string(), classification_param(classes));
    }

    ModelInferRequest {
        model_name: model_name.to_string(),
        inputs: vec![input],
        outputs: vec![output],
        raw_input_contents: vec![raw],
        ..Default::default()
    }
}

/// One synchronous classification round trip: send the image bytes to
/// `model_name` at `url`, return the `"OUTPUT"` tensor of the response.
pub async fn classify(
    url: &str,
    model_name: &str,
    image_bytes: Vec<u8>,
    classes: i64,
) -> Result<OutputTensor, ClassifyError> {
    if image_bytes.is_empty() {
        return Err(ClassifyError::EmptyImage);
    }
    if model_name.is_empty() {
        return Err(ClassifyError::EmptyModelName);
    }

    let endpoint = format!("http://{url}");
    let mut client = GrpcInferenceServiceClient::connect(endpoint).await?;

    tracing::debug!(model_name, classes, "sending inference request");
    let request = Request::new(build_request(model_name, image_bytes, classes));
    let response = client.model_infer(request).await?.into_inner();

    Ok(extract_output(&response, OUTPUT_NAME)?)
}

/// Renders an output tensor for stdout: a header line with name, datatype and
/// shape, then one value (or classification string) per line.
pub fn format_output(output: &OutputTensor) -> Result<String, TensorError> {
    let mut lines = vec![format!(
        "{} {} {:?}",
        output.name, output.datatype, output.shape
    )];
    match output.values()? {
        TensorValues::Uint8(values) => {
            for value in values {
                lines.push(value.to_string());
            }
        }
        TensorValues::Float32(values) => {
            for value in values {
                lines.push(value.to_string());
            }
        }
        TensorValues::Bytes(elements) => {
            for element in elements {
                lines.push(String::from_utf8_lossy(&element).into_owned());
            }
        }
    }
    Ok(lines.join("\n"))
}
