//! Catalogue of post-process (PLE) kernels and their hardware block-config
//! gating. Kernels are programmed per block config, so a Part must only
//! consider block sizes a kernel build exists for.

use serde::{Deserialize, Serialize};

use crate::components::BlockConfig;

/// Post-process kernel selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PleOperation {
    Addition,
    AdditionRescale,
    AvgPool3x3_1_1Udma,
    Downsample2x2_2_2,
    Interleave2x2_2_2,
    LeakyRelu,
    MaxPool1d,
    MaxPool2x2_2_2,
    MaxPool3x3_2_2Even,
    MaxPool3x3_2_2Odd,
    MeanXy7x7,
    MeanXy8x8,
    Passthrough,
    Sigmoid,
    TransposeXy,
}

impl PleOperation {
    /// Kernels whose output is spatially smaller than their input require
    /// whole input windows per block.
    pub fn is_downsampling(self) -> bool {
        matches!(
            self,
            PleOperation::Downsample2x2_2_2
                | PleOperation::Interleave2x2_2_2
                | PleOperation::MaxPool2x2_2_2
                | PleOperation::MaxPool3x3_2_2Even
                | PleOperation::MaxPool3x3_2_2Odd
        )
    }

    /// The block configs a kernel build exists for. `None` means every block
    /// config is supported.
    fn supported_block_configs(self) -> Option<&'static [BlockConfig]> {
        match self {
            // Works on brick-group-sized windows only.
            PleOperation::MeanXy7x7 | PleOperation::MeanXy8x8 => {
                const CONFIGS: &[BlockConfig] = &[BlockConfig::new(8, 8)];
                Some(CONFIGS)
            }
            // Interleaving rearranges a full 16x16 region at a time.
            PleOperation::Interleave2x2_2_2 => {
                const CONFIGS: &[BlockConfig] = &[BlockConfig::new(16, 16)];
                Some(CONFIGS)
            }
            // Assumes X-Y-Z block traversal over wide rows.
            PleOperation::MaxPool3x3_2_2Even | PleOperation::MaxPool3x3_2_2Odd => {
                const CONFIGS: &[BlockConfig] =
                    &[BlockConfig::new(16, 16), BlockConfig::new(32, 8)];
                Some(CONFIGS)
            }
            // 2x2 windows need even block dimensions.
            PleOperation::MaxPool2x2_2_2 | PleOperation::Downsample2x2_2_2 => {
                const CONFIGS: &[BlockConfig] = &[
                    BlockConfig::new(16, 16),
                    BlockConfig::new(16, 8),
                    BlockConfig::new(8, 16),
                    BlockConfig::new(8, 8),
                    BlockConfig::new(32, 8),
                ];
                Some(CONFIGS)
            }
            _ => None,
        }
    }
}

/// Restricts `block_configs` to those the kernel supports, preserving order.
pub fn filter_ple_block_configs(
    operation: PleOperation,
    block_configs: Vec<BlockConfig>,
) -> Vec<BlockConfig> {
    match operation.supported_block_configs() {
        Some(supported) => block_configs
            .into_iter()
            .filter(|b| supported.contains(b))
            .collect(),
        None => block_configs,
    }
}

pub fn ple_block_config_allowed(operation: PleOperation, block_config: BlockConfig) -> bool {
    match operation.supported_block_configs() {
        Some(supported) => supported.contains(&block_config),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_kernel_keeps_everything() {
        let blocks = vec![BlockConfig::new(16, 16), BlockConfig::new(8, 32)];
        assert_eq!(
            filter_ple_block_configs(PleOperation::Passthrough, blocks.clone()),
            blocks
        );
    }

    #[test]
    fn mean_kernels_only_run_on_8x8() {
        let blocks = vec![
            BlockConfig::new(16, 16),
            BlockConfig::new(8, 8),
            BlockConfig::new(32, 8),
        ];
        assert_eq!(
            filter_ple_block_configs(PleOperation::MeanXy8x8, blocks),
            vec![BlockConfig::new(8, 8)]
        );
        assert!(!ple_block_config_allowed(
            PleOperation::MeanXy7x7,
            BlockConfig::new(16, 16)
        ));
    }

    #[test]
    fn maxpool3x3_rejects_narrow_blocks() {
        assert!(ple_block_config_allowed(
            PleOperation::MaxPool3x3_2_2Even,
            BlockConfig::new(32, 8)
        ));
        assert!(!ple_block_config_allowed(
            PleOperation::MaxPool3x3_2_2Odd,
            BlockConfig::new(8, 32)
        ));
    }
}
