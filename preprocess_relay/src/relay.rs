use crate::config::DownstreamConfig;
use crate::downstream::{Downstream, DownstreamError, GrpcDownstream};
use crate::preprocess;
use infer_proto::model_infer_request::InferRequestedOutputTensor;
use infer_proto::model_infer_response::InferOutputTensor;
use infer_proto::tensor::{classification_param, extract_output, InputTensor};
use infer_proto::{ModelInferRequest, ModelInferResponse};
use tonic::{async_trait, Status};

pub const INPUT_NAME: &str = "INPUT";
pub const OUTPUT_NAME: &str = "OUTPUT";
const DOWNSTREAM_INPUT_NAME: &str = "input";

/// A model backend as driven by the hosting runtime: one call per batch,
/// one result per request.
#[async_trait]
pub trait InferenceBackend: Send + Sync + 'static {
    async fn execute(
        &self,
        batch: Vec<ModelInferRequest>,
    ) -> Vec<Result<ModelInferResponse, Status>>;
}

/// Backend that preprocesses each incoming image and relays it to a second
/// inference server, returning that server's classification as its own
/// `"OUTPUT"` tensor.
pub struct PreprocessingRelay<D: Downstream> {
    downstream: D,
    route: DownstreamConfig,
}

impl PreprocessingRelay<GrpcDownstream> {
    /// Lifecycle hook called once by the hosting runtime before the first
    /// batch. Opens the retained downstream connection.
    pub async fn initialize(route: &DownstreamConfig) -> Result<Self, DownstreamError> {
        let downstream = GrpcDownstream::connect(route.get_address()).await?;
        Ok(Self::new(downstream, route.clone()))
    }

    pub fn close(self) {
        self.downstream.close();
    }
}

impl<D: Downstream> PreprocessingRelay<D> {
    pub fn new(downstream: D, route: DownstreamConfig) -> Self {
        Self { downstream, route }
    }

    async fn handle(&self, request: ModelInferRequest) -> Result<ModelInferResponse, Status> {
        let image_bytes = input_bytes(&request, INPUT_NAME)?;

        let array = preprocess::preprocess(&image_bytes)
            .map_err(|e| Status::invalid_argument(format!("image preprocessing failed: {e}")))?;
        let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
        let values = array.into_raw_vec_and_offset().0;

        let input = InputTensor::from_f32(DOWNSTREAM_INPUT_NAME, shape, values)
            .map_err(|e| Status::internal(format!("failed to build input tensor: {e}")))?;
        let (input_meta, raw) = input.into_parts();

        let mut requested = InferRequestedOutputTensor {
            name: self.route.output_name.clone(),
            parameters: Default::default(),
        };
        requested.parameters.insert(
            "classification".to_string(),
            classification_param(self.route.class_count),
        );

        let downstream_request = ModelInferRequest {
            model_name: self.route.model_name.clone(),
            inputs: vec![input_meta],
            outputs: vec![requested],
            raw_input_contents: vec![raw],
            ..Default::default()
        };

        let response = self.downstream.infer(downstream_request).await?;
        // An absent output tensor is a contract violation on the downstream
        // side, reported as a data error rather than papered over.
        let relayed = extract_output(&response, &self.route.output_name)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        Ok(ModelInferResponse {
            model_name: request.model_name,
            id: request.id,
            outputs: vec![InferOutputTensor {
                name: OUTPUT_NAME.to_string(),
                datatype: relayed.datatype,
                shape: relayed.shape,
                parameters: Default::default(),
                contents: None,
            }],
            raw_output_contents: vec![relayed.raw],
            ..Default::default()
        })
    }
}

#[async_trait]
impl<D: Downstream> InferenceBackend for PreprocessingRelay<D> {
    async fn execute(
        &self,
        batch: Vec<ModelInferRequest>,
    ) -> Vec<Result<ModelInferResponse, Status>> {
        let mut results = Vec::with_capacity(batch.len());
        // Each request succeeds or fails on its own; a bad image in the batch
        // must not take the rest of the batch down with it.
        for request in batch {
            let result = self.handle(request).await;
            if let Err(status) = &result {
                tracing::error!("request failed: {}", status);
            }
            results.push(result);
        }
        results
    }
}

fn input_bytes(request: &ModelInferRequest, name: &str) -> Result<Vec<u8>, Status> {
    let (index, input) = request
        .inputs
        .iter()
        .enumerate()
        .find(|(_, input)| input.name == name)
        .ok_or_else(|| {
            Status::invalid_argument(format!("input tensor `{name}` missing from request"))
        })?;

    if let Some(raw) = request.raw_input_contents.get(index) {
        return Ok(raw.clone());
    }
    if let Some(contents) = &input.contents {
        if !contents.uint_contents.is_empty() {
            return Ok(contents.uint_contents.iter().map(|&v| v as u8).collect());
        }
    }
    Err(Status::invalid_argument(format!(
        "input tensor `{name}` carries no data"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use infer_proto::infer_parameter::ParameterChoice;
    use infer_proto::tensor::DATATYPE_FP32;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn test_route() -> DownstreamConfig {
        DownstreamConfig {
            host: "localhost".to_string(),
            port: 8000,
            model_name: "inception_graphdef".to_string(),
            output_name: "InceptionV3/Predictions/Softmax".to_string(),
            class_count: 3,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 100, Rgb([255, 0, 0]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn image_request(image_bytes: Vec<u8>) -> ModelInferRequest {
        let (meta, raw) = InputTensor::from_bytes(INPUT_NAME, image_bytes).into_parts();
        ModelInferRequest {
            model_name: "image_relay".to_string(),
            inputs: vec![meta],
            raw_input_contents: vec![raw],
            ..Default::default()
        }
    }

    /// Records forwarded requests and answers with a canned softmax tensor.
    struct MockDownstream {
        requests: Mutex<Vec<ModelInferRequest>>,
        output_name: String,
    }

    impl MockDownstream {
        fn new(output_name: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                output_name: output_name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Downstream for MockDownstream {
        async fn infer(&self, request: ModelInferRequest) -> Result<ModelInferResponse, Status> {
            self.requests.lock().unwrap().push(request);
            let raw: Vec<u8> = [0.7f32, 0.2, 0.1]
                .iter()
                .flat_map(|f| f.to_le_bytes())
                .collect();
            Ok(ModelInferResponse {
                outputs: vec![InferOutputTensor {
                    name: self.output_name.clone(),
                    datatype: DATATYPE_FP32.to_string(),
                    shape: vec![1, 3],
                    parameters: Default::default(),
                    contents: None,
                }],
                raw_output_contents: vec![raw],
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn relay_forwards_preprocessed_tensor_downstream() {
        let mock = MockDownstream::new("InceptionV3/Predictions/Softmax");
        let relay = PreprocessingRelay::new(mock, test_route());

        let results = relay.execute(vec![image_request(png_bytes())]).await;
        assert_eq!(results.len(), 1);
        let response = results[0].as_ref().unwrap();

        assert_eq!(response.outputs.len(), 1);
        assert_eq!(response.outputs[0].name, OUTPUT_NAME);
        assert_eq!(response.outputs[0].datatype, DATATYPE_FP32);
        assert_eq!(response.outputs[0].shape, vec![1, 3]);
        assert_eq!(response.raw_output_contents.len(), 1);

        let forwarded = relay.downstream.requests.lock().unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].model_name, "inception_graphdef");
        assert_eq!(forwarded[0].inputs[0].name, "input");
        assert_eq!(forwarded[0].inputs[0].datatype, DATATYPE_FP32);
        assert_eq!(forwarded[0].inputs[0].shape, vec![1, 299, 299, 3]);
        assert_eq!(forwarded[0].raw_input_contents[0].len(), 299 * 299 * 3 * 4);

        let classification = forwarded[0].outputs[0]
            .parameters
            .get("classification")
            .expect("classification parameter should be forwarded");
        assert_eq!(
            classification.parameter_choice,
            Some(ParameterChoice::Int64Param(3))
        );
    }

    #[tokio::test]
    async fn one_bad_image_does_not_abort_the_batch() {
        let mock = MockDownstream::new("InceptionV3/Predictions/Softmax");
        let relay = PreprocessingRelay::new(mock, test_route());

        let batch = vec![
            image_request(png_bytes()),
            image_request(b"not an image at all".to_vec()),
            image_request(png_bytes()),
        ];
        let results = relay.execute(batch).await;

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(
            results[1].as_ref().unwrap_err().code(),
            tonic::Code::InvalidArgument
        );
    }

    #[tokio::test]
    async fn missing_input_tensor_is_rejected() {
        let mock = MockDownstream::new("InceptionV3/Predictions/Softmax");
        let relay = PreprocessingRelay::new(mock, test_route());

        let request = ModelInferRequest {
            model_name: "image_relay".to_string(),
            ..Default::default()
        };
        let results = relay.execute(vec![request]).await;

        assert_eq!(results.len(), 1);
        let status = results[0].as_ref().unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("INPUT"));
    }

    #[tokio::test]
    async fn missing_downstream_output_is_a_data_error() {
        // Downstream answers with a differently named tensor.
        let mock = MockDownstream::new("some_other_output");
        let relay = PreprocessingRelay::new(mock, test_route());

        let results = relay.execute(vec![image_request(png_bytes())]).await;
        let status = results[0].as_ref().unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("InceptionV3/Predictions/Softmax"));
    }

    #[tokio::test]
    async fn typed_uint_contents_are_accepted_as_input() {
        let mock = MockDownstream::new("InceptionV3/Predictions/Softmax");
        let relay = PreprocessingRelay::new(mock, test_route());

        let bytes = png_bytes();
        let (meta, _) = InputTensor::from_bytes(INPUT_NAME, bytes.clone()).into_parts();
        let request = ModelInferRequest {
            model_name: "image_relay".to_string(),
            inputs: vec![infer_proto::model_infer_request::InferInputTensor {
                contents: Some(infer_proto::InferTensorContents {
                    uint_contents: bytes.iter().map(|&b| b as u32).collect(),
                    ..Default::default()
                }),
                ..meta
            }],
            ..Default::default()
        };

        let results = relay.execute(vec![request]).await;
        assert!(results[0].is_ok());
    }
}
