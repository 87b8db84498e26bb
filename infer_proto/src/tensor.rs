//! Typed tensor construction and response decoding on top of the raw
//! protobuf messages.
//!
//! The protocol itself is dynamically typed (datatype is a string, data is a
//! byte blob). This module pins the supported element types down to a closed
//! variant set resolved once at construction time, so the rest of the code
//! never dispatches on datatype strings.

use crate::inference::{
    infer_parameter, model_infer_request::InferInputTensor,
    model_infer_response::InferOutputTensor, InferParameter, ModelInferResponse,
};
use thiserror::Error;

pub const DATATYPE_UINT8: &str = "UINT8";
pub const DATATYPE_FP32: &str = "FP32";
pub const DATATYPE_BYTES: &str = "BYTES";

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("output tensor `{0}` missing from response")]
    MissingOutput(String),
    #[error("output tensor `{0}` carries no data")]
    EmptyOutput(String),
    #[error("shape {shape:?} does not match {len} elements")]
    ShapeMismatch { shape: Vec<i64>, len: usize },
    #[error("unsupported datatype `{0}`")]
    UnsupportedDatatype(String),
    #[error("raw tensor payload truncated: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
}

/// Element data of an input tensor. One variant per supported wire datatype.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Uint8(Vec<u8>),
    Float32(Vec<f32>),
}

impl TensorData {
    pub fn datatype(&self) -> &'static str {
        match self {
            TensorData::Uint8(_) => DATATYPE_UINT8,
            TensorData::Float32(_) => DATATYPE_FP32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Uint8(v) => v.len(),
            TensorData::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn into_le_bytes(self) -> Vec<u8> {
        match self {
            TensorData::Uint8(v) => v,
            TensorData::Float32(v) => v.iter().flat_map(|f| f.to_le_bytes()).collect(),
        }
    }
}

/// A named, typed, shaped input tensor, built fresh per request and consumed
/// by `into_parts` when the request is assembled.
#[derive(Debug, Clone)]
pub struct InputTensor {
    name: String,
    shape: Vec<i64>,
    data: TensorData,
}

impl InputTensor {
    /// Wraps an opaque byte buffer as a rank-1 UINT8 tensor of shape `[len]`.
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        let shape = vec![bytes.len() as i64];
        Self {
            name: name.to_string(),
            shape,
            data: TensorData::Uint8(bytes),
        }
    }

    /// Wraps a flat f32 buffer with an explicit shape.
    pub fn from_f32(name: &str, shape: Vec<i64>, values: Vec<f32>) -> Result<Self, TensorError> {
        let expected: i64 = shape.iter().product();
        if expected != values.len() as i64 {
            return Err(TensorError::ShapeMismatch {
                shape,
                len: values.len(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            shape,
            data: TensorData::Float32(values),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> &'static str {
        self.data.datatype()
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    /// Splits into the wire metadata and the raw little-endian payload
    /// destined for `raw_input_contents`.
    pub fn into_parts(self) -> (InferInputTensor, Vec<u8>) {
        let meta = InferInputTensor {
            name: self.name,
            datatype: self.data.datatype().to_string(),
            shape: self.shape,
            parameters: Default::default(),
            contents: None,
        };
        (meta, self.data.into_le_bytes())
    }
}

/// The `classification` request parameter: asks the server to return the
/// top-N classes as strings instead of the raw score tensor.
pub fn classification_param(count: i64) -> InferParameter {
    InferParameter {
        parameter_choice: Some(infer_parameter::ParameterChoice::Int64Param(count)),
    }
}

/// An output tensor copied out of a response, owned by the caller.
#[derive(Debug, Clone)]
pub struct OutputTensor {
    pub name: String,
    pub datatype: String,
    pub shape: Vec<i64>,
    pub raw: Vec<u8>,
}

/// Decoded element values of an output tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    Uint8(Vec<u8>),
    Float32(Vec<f32>),
    /// Variable-length byte strings, e.g. `prob:index:label` classification
    /// results.
    Bytes(Vec<Vec<u8>>),
}

impl OutputTensor {
    pub fn values(&self) -> Result<TensorValues, TensorError> {
        match self.datatype.as_str() {
            DATATYPE_UINT8 => Ok(TensorValues::Uint8(self.raw.clone())),
            DATATYPE_FP32 => {
                if self.raw.len() % 4 != 0 {
                    return Err(TensorError::Truncated {
                        expected: self.raw.len().div_ceil(4) * 4,
                        got: self.raw.len(),
                    });
                }
                let values = self
                    .raw
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(TensorValues::Float32(values))
            }
            DATATYPE_BYTES => decode_length_prefixed(&self.raw).map(TensorValues::Bytes),
            other => Err(TensorError::UnsupportedDatatype(other.to_string())),
        }
    }
}

/// Looks up a response output by name and copies it out, preferring the raw
/// payload and falling back to typed `contents` when the server used those.
pub fn extract_output(
    response: &ModelInferResponse,
    name: &str,
) -> Result<OutputTensor, TensorError> {
    let (index, output) = response
        .outputs
        .iter()
        .enumerate()
        .find(|(_, output)| output.name == name)
        .ok_or_else(|| TensorError::MissingOutput(name.to_string()))?;

    let raw = match response.raw_output_contents.get(index) {
        Some(raw) => raw.clone(),
        None => raw_from_contents(output).ok_or_else(|| TensorError::EmptyOutput(name.to_string()))?,
    };

    Ok(OutputTensor {
        name: output.name.clone(),
        datatype: output.datatype.clone(),
        shape: output.shape.clone(),
        raw,
    })
}

fn raw_from_contents(output: &InferOutputTensor) -> Option<Vec<u8>> {
    let contents = output.contents.as_ref()?;
    match output.datatype.as_str() {
        DATATYPE_UINT8 => Some(contents.uint_contents.iter().map(|&v| v as u8).collect()),
        DATATYPE_FP32 => Some(
            contents
                .fp32_contents
                .iter()
                .flat_map(|f| f.to_le_bytes())
                .collect(),
        ),
        DATATYPE_BYTES => Some(
            contents
                .bytes_contents
                .iter()
                .flat_map(|b| {
                    let mut framed = (b.len() as u32).to_le_bytes().to_vec();
                    framed.extend_from_slice(b);
                    framed
                })
                .collect(),
        ),
        _ => None,
    }
}

// BYTES tensors frame each element as a 4-byte little-endian length followed
// by that many bytes.
fn decode_length_prefixed(raw: &[u8]) -> Result<Vec<Vec<u8>>, TensorError> {
    let mut elements = Vec::new();
    let mut offset = 0;
    while offset < raw.len() {
        if offset + 4 > raw.len() {
            return Err(TensorError::Truncated {
                expected: offset + 4,
                got: raw.len(),
            });
        }
        let len =
            u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
                as usize;
        offset += 4;
        if offset + len > raw.len() {
            return Err(TensorError::Truncated {
                expected: offset + len,
                got: raw.len(),
            });
        }
        elements.push(raw[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(elements)
}
