//! Weight encoding for the compute engine.
//!
//! Weights are stored in DRAM pre-encoded into the stream the engine's
//! weight decoder consumes: one compressed sub-stream per output channel,
//! grouped into stripes of `stripe_depth` channels. Encoding is split in two
//! stages so the expensive per-channel compression (stage 1) can run on the
//! thread pool ahead of time, while the cheap stripe layout (stage 2) runs
//! when a plan actually needs the result.

pub mod cache;

pub use cache::WeightEncoderCache;

use std::sync::Arc;

use crate::components::caps::HardwareCapabilities;
use crate::components::{DataFormat, MceAlgorithm, MceOperation, QuantizationInfo, TensorInfo};
use stripegen_common::TensorShape;

/// The fully-connected layout packs input channels in groups of this size;
/// encoding works best when the IFM count is padded up to a multiple.
pub const WEIGHTS_CHANNEL_VEC_PROD: u32 = 1024;

/// Location of one encoded weight stripe within the DRAM blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeightsMetadata {
    pub offset: u32,
    pub size: u32,
}

/// The encoder's output: the DRAM byte blob, per-stripe locations, and the
/// largest stripe (which sizes the SRAM slot).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedWeights {
    pub metadata: Vec<WeightsMetadata>,
    pub max_size: u32,
    pub data: Vec<u8>,
}

/// Everything that determines an encoding result. Two equal requests always
/// produce identical encoded weights, which is what makes caching sound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightEncodingRequest {
    pub weights_tensor_info: TensorInfo,
    /// Shared to keep request copies cheap; the data is never mutated.
    pub weights_data: Arc<Vec<u8>>,
    pub bias_tensor_info: TensorInfo,
    pub bias_data: Vec<i32>,
    pub input_quantization_info: QuantizationInfo,
    pub output_quantization_info: QuantizationInfo,
    /// Output channels per encoded stripe.
    pub stripe_depth: u32,
    pub stride_y: u32,
    pub stride_x: u32,
    pub padding_top: u32,
    pub padding_left: u32,
    /// Input channels consumed per weight-decoder iteration.
    pub iteration_size: u32,
    pub operation: MceOperation,
    pub algorithm: MceAlgorithm,
}

impl std::hash::Hash for WeightEncodingRequest {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Deliberately shallow: hashing the full weight data would cost more
        // than the occasional collision, and the map falls back to the full
        // equality comparison anyway.
        self.weights_data.len().hash(state);
        self.bias_data.len().hash(state);
        self.stripe_depth.hash(state);
        self.iteration_size.hash(state);
        self.algorithm.hash(state);
    }
}

/// The stripe depth of the weight DMA for a given weight layout, from the
/// compute stripe's weight shape.
pub fn get_weight_stripe_depth(
    weight_info: &TensorInfo,
    weight_stripe_shape: TensorShape,
    stride: crate::components::Stride,
) -> u32 {
    match weight_info.data_format {
        // Depthwise weights: one output channel per input channel, so the
        // depth follows the IFM axis. Strided inputs are interleaved, which
        // multiplies the IFM axis; the decoder sees the un-interleaved depth.
        DataFormat::Hwim => {
            weight_stripe_shape[2] * weight_stripe_shape[3] / (stride.x * stride.y)
        }
        _ => weight_stripe_shape[3],
    }
}

/// Per-channel compressed streams: the output of stage 1.
#[derive(Clone, Debug)]
pub struct Stage1Results {
    per_ofm_streams: Vec<Vec<u8>>,
    stripe_depth: u32,
}

/// Stage 1: compress each output channel's weights and bias independently.
///
/// The stream per channel is a zero-mask-plus-literals coding: one mask bit
/// per weight marking it zero, then the non-zero bytes, then the 4 bias
/// bytes. NN weights are sparse enough that this wins over the raw layout
/// for almost every real tensor.
pub fn encode_stage1(request: &WeightEncodingRequest) -> Stage1Results {
    let dims = request.weights_tensor_info.dimensions;
    let num_ofms = match request.weights_tensor_info.data_format {
        DataFormat::Hwim => dims[2] * dims[3],
        _ => dims[3],
    };
    let weights_per_ofm = if num_ofms == 0 {
        0
    } else {
        request.weights_data.len() as u32 / num_ofms
    };
    let zero_point = request.weights_tensor_info.quantization.zero_point as u8;

    let mut per_ofm_streams = Vec::with_capacity(num_ofms as usize);
    for ofm in 0..num_ofms {
        let mut stream = Vec::new();

        // Weights for one OFM. HWIO lays channels innermost, so the per-OFM
        // weights are strided; HWIM is already grouped per channel.
        let gather = |i: u32| -> u8 {
            let index = match request.weights_tensor_info.data_format {
                DataFormat::Hwim => (ofm * weights_per_ofm + i) as usize,
                _ => (i * num_ofms + ofm) as usize,
            };
            request.weights_data.get(index).copied().unwrap_or(zero_point)
        };

        let mut mask_bits: Vec<bool> = Vec::with_capacity(weights_per_ofm as usize);
        let mut literals: Vec<u8> = Vec::new();
        for i in 0..weights_per_ofm {
            let w = gather(i);
            if w == zero_point {
                mask_bits.push(true);
            } else {
                mask_bits.push(false);
                literals.push(w);
            }
        }
        for chunk in mask_bits.chunks(8) {
            let mut byte = 0u8;
            for (bit, zero) in chunk.iter().enumerate() {
                if *zero {
                    byte |= 1 << bit;
                }
            }
            stream.push(byte);
        }
        stream.extend_from_slice(&literals);

        let bias = request.bias_data.get(ofm as usize).copied().unwrap_or(0);
        stream.extend_from_slice(&bias.to_le_bytes());

        per_ofm_streams.push(stream);
    }

    Stage1Results {
        per_ofm_streams,
        stripe_depth: request.stripe_depth,
    }
}

/// Stage 2: lay the per-channel streams out stripe by stripe and record each
/// stripe's location. Returns `None` when the largest encoded stripe cannot
/// fit in SRAM, which makes any plan depending on it infeasible.
pub fn encode_stage2(
    caps: &HardwareCapabilities,
    stage1: Stage1Results,
) -> Option<Arc<EncodedWeights>> {
    let stripe_depth = stage1.stripe_depth.max(1) as usize;
    let mut data = Vec::new();
    let mut metadata = Vec::new();
    let mut max_size = 0u32;

    for stripe in stage1.per_ofm_streams.chunks(stripe_depth) {
        let offset = data.len() as u32;
        for stream in stripe {
            data.extend_from_slice(stream);
        }
        let size = data.len() as u32 - offset;
        metadata.push(WeightsMetadata { offset, size });
        max_size = max_size.max(size);
    }

    if max_size > caps.total_sram_size() {
        log::trace!(
            "Encoded weight stripe of {max_size} bytes exceeds the {} byte SRAM budget",
            caps.total_sram_size()
        );
        return None;
    }

    Some(Arc::new(EncodedWeights {
        metadata,
        max_size,
        data,
    }))
}

/// Both stages back to back, for callers without a pool.
pub fn encode_weights(
    caps: &HardwareCapabilities,
    request: &WeightEncodingRequest,
) -> Option<Arc<EncodedWeights>> {
    encode_stage2(caps, encode_stage1(request))
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::components::DataType;

    /// A 1x1 depthwise identity-style request over `num_ifms` channels.
    pub(crate) fn depthwise_request(num_ifms: u32, stripe_depth: u32) -> WeightEncodingRequest {
        let weight_info = TensorInfo {
            dimensions: TensorShape::new(1, 1, num_ifms, 1),
            data_type: DataType::UInt8Quantized,
            data_format: DataFormat::Hwim,
            quantization: QuantizationInfo::new(0, 0.5),
        };
        let bias_info = TensorInfo {
            dimensions: TensorShape::new(1, 1, 1, num_ifms),
            data_type: DataType::Int32Quantized,
            data_format: DataFormat::Nhwc,
            quantization: QuantizationInfo::new(0, 0.5),
        };
        WeightEncodingRequest {
            weights_tensor_info: weight_info,
            weights_data: Arc::new(vec![2u8; num_ifms as usize]),
            bias_tensor_info: bias_info,
            bias_data: vec![0; num_ifms as usize],
            input_quantization_info: QuantizationInfo::new(0, 1.0),
            output_quantization_info: QuantizationInfo::new(0, 1.0),
            stripe_depth,
            stride_y: 1,
            stride_x: 1,
            padding_top: 0,
            padding_left: 0,
            iteration_size: 1,
            operation: MceOperation::DepthwiseConvolution,
            algorithm: MceAlgorithm::Direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::depthwise_request as request;
    use super::*;
    use crate::components::DataType;
    use pretty_assertions::assert_eq;

    #[test]
    fn encoding_is_deterministic() {
        let caps = HardwareCapabilities::standard();
        let r = request(32, 16);
        let a = encode_weights(&caps, &r).unwrap();
        let b = encode_weights(&caps, &r).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn stripes_cover_the_blob_contiguously() {
        let caps = HardwareCapabilities::standard();
        let encoded = encode_weights(&caps, &request(32, 16)).unwrap();
        assert_eq!(encoded.metadata.len(), 2);
        let mut expected_offset = 0;
        for m in &encoded.metadata {
            assert_eq!(m.offset, expected_offset);
            assert!(m.size <= encoded.max_size);
            expected_offset += m.size;
        }
        assert_eq!(expected_offset as usize, encoded.data.len());
    }

    #[test]
    fn oversized_stripes_are_rejected() {
        // 1 MiB of SRAM but a single stripe holding all channels of a big
        // dense tensor.
        let caps = HardwareCapabilities::new(1024, 16, 16);
        let mut r = request(4096, 4096);
        r.weights_data = Arc::new(vec![7u8; 4096]);
        assert!(encode_weights(&caps, &r).is_none());
    }

    #[test]
    fn weight_stripe_depth_follows_the_layout() {
        let hwim = TensorInfo {
            dimensions: TensorShape::new(1, 1, 32, 1),
            data_type: DataType::UInt8Quantized,
            data_format: DataFormat::Hwim,
            quantization: QuantizationInfo::new(0, 0.5),
        };
        let stripe = TensorShape::new(1, 1, 16, 1);
        assert_eq!(
            get_weight_stripe_depth(&hwim, stripe, crate::components::Stride::new(1, 1)),
            16
        );
        let hwio = TensorInfo {
            data_format: DataFormat::Hwio,
            ..hwim
        };
        let stripe = TensorShape::new(3, 3, 32, 16);
        assert_eq!(
            get_weight_stripe_depth(&hwio, stripe, crate::components::Stride::new(1, 1)),
            16
        );
    }
}
