//! Search-space configuration for the stripe generator: which axis-split
//! strategies, block configs and buffering ranges are considered for a Part.
//!
//! The default config enables everything; per-Part overrides come from an
//! optional textual rule file whose sections are regex patterns matched
//! against the Part identifier and applied in file order. The rules are
//! parsed once and injected at construction time so the core stays testable
//! without environment coupling.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::components::error::StripeConfigError;
use crate::components::{BlockConfig, CascadeType};

/// Inclusive `[min, max]` clamp, used both for stripe-size multipliers and
/// for explicit buffering-depth overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimRange {
    pub min: u32,
    pub max: u32,
}

impl DimRange {
    pub const UNLIMITED: DimRange = DimRange {
        min: 0,
        max: u32::MAX,
    };

    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

/// Which axis-split strategies the generator may enumerate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Splits {
    pub mce_and_ple_output_height: bool,
    pub mce_output_height_only: bool,
    pub width_only: bool,
    pub width_height: bool,
    pub width_height_output_depth: bool,
    pub width_height_output_depth_input_depth: bool,
    pub output_depth_input_depth: bool,
    pub mce_and_ple_output_depth: bool,
    pub mce_output_depth_only: bool,
    pub none: bool,
}

impl Splits {
    pub const ALL: Splits = Splits {
        mce_and_ple_output_height: true,
        mce_output_height_only: true,
        width_only: true,
        width_height: true,
        width_height_output_depth: true,
        width_height_output_depth_input_depth: true,
        output_depth_input_depth: true,
        mce_and_ple_output_depth: true,
        mce_output_depth_only: true,
        none: true,
    };

    pub const NONE: Splits = Splits {
        mce_and_ple_output_height: false,
        mce_output_height_only: false,
        width_only: false,
        width_height: false,
        width_height_output_depth: false,
        width_height_output_depth_input_depth: false,
        output_depth_input_depth: false,
        mce_and_ple_output_depth: false,
        mce_output_depth_only: false,
        none: false,
    };
}

impl StripeConfig {
    pub fn disable_all_splits(&mut self) {
        self.splits = Splits::NONE;
    }

    pub fn disable_split_height(&mut self) {
        self.splits.mce_and_ple_output_height = false;
        self.splits.mce_output_height_only = false;
        self.splits.width_height = false;
        self.splits.width_height_output_depth = false;
        self.splits.width_height_output_depth_input_depth = false;
    }

    pub fn disable_split_width(&mut self) {
        self.splits.width_only = false;
        self.splits.width_height = false;
        self.splits.width_height_output_depth = false;
        self.splits.width_height_output_depth_input_depth = false;
    }

    pub fn disable_split_input_depth(&mut self) {
        self.splits.width_height_output_depth_input_depth = false;
        self.splits.output_depth_input_depth = false;
    }

    pub fn disable_split_output_depth(&mut self) {
        self.splits.width_height_output_depth = false;
        self.splits.width_height_output_depth_input_depth = false;
        self.splits.output_depth_input_depth = false;
        self.splits.mce_and_ple_output_depth = false;
        self.splits.mce_output_depth_only = false;
    }
}

/// Which cascade roles a Part may produce plans for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTypes {
    pub lonely: bool,
    pub beginning: bool,
    pub middle: bool,
    pub end: bool,
}

impl PlanTypes {
    pub const ALL: PlanTypes = PlanTypes {
        lonely: true,
        beginning: true,
        middle: true,
        end: true,
    };
}

/// Explicit buffering-depth overrides, intersected with the generated
/// ranges as the final clamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumStripesLimits {
    pub input: DimRange,
    pub output: DimRange,
    pub weight: DimRange,
    pub ple_input: DimRange,
}

impl NumStripesLimits {
    pub const UNLIMITED: NumStripesLimits = NumStripesLimits {
        input: DimRange::UNLIMITED,
        output: DimRange::UNLIMITED,
        weight: DimRange::UNLIMITED,
        ple_input: DimRange::UNLIMITED,
    };
}

/// The full search-space configuration for one Part. Immutable once built;
/// read by `StripeGenerator`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeConfig {
    pub splits: Splits,
    pub block_configs: Vec<BlockConfig>,
    pub block_width_multiplier: DimRange,
    pub block_height_multiplier: DimRange,
    pub ifm_depth_multiplier: DimRange,
    pub ofm_depth_multiplier: DimRange,
    pub plan_types: PlanTypes,
    pub num_stripes: NumStripesLimits,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            splits: Splits::ALL,
            block_configs: vec![
                BlockConfig::new(16, 16),
                BlockConfig::new(16, 8),
                BlockConfig::new(8, 16),
                BlockConfig::new(8, 8),
                BlockConfig::new(32, 8),
                BlockConfig::new(8, 32),
            ],
            block_width_multiplier: DimRange::new(1, u32::MAX),
            block_height_multiplier: DimRange::new(1, u32::MAX),
            ifm_depth_multiplier: DimRange::new(1, u32::MAX),
            ofm_depth_multiplier: DimRange::new(1, u32::MAX),
            plan_types: PlanTypes::ALL,
            num_stripes: NumStripesLimits::UNLIMITED,
        }
    }
}

impl StripeConfig {
    /// Builds the config for the Part named `identifier`, applying every
    /// override section whose pattern matches, in file order.
    pub fn for_part(identifier: &str, rules: Option<&StripeConfigRules>) -> Self {
        let mut config = StripeConfig::default();
        if let Some(rules) = rules {
            for section in &rules.sections {
                if section.pattern.is_match(identifier) {
                    log::debug!(
                        "Applying stripe config section [{}] to part {identifier}",
                        section.pattern.as_str()
                    );
                    for command in &section.commands {
                        command.apply(&mut config);
                    }
                }
            }
        }
        config
    }
}

enum Bound {
    Min,
    Max,
}

enum RangeKind {
    BlockWidthMultiplier,
    BlockHeightMultiplier,
    IfmDepthMultiplier,
    OfmDepthMultiplier,
    InputNumStripes,
    OutputNumStripes,
    WeightNumStripes,
    PleInputNumStripes,
}

enum SplitKind {
    MceAndPleOutputHeight,
    MceOutputHeightOnly,
    WidthOnly,
    WidthHeight,
    WidthHeightOutputDepth,
    WidthHeightOutputDepthInputDepth,
    OutputDepthInputDepth,
    MceAndPleOutputDepth,
    MceOutputDepthOnly,
    None,
}

enum Command {
    Split(SplitKind, bool),
    PlanType(CascadeType, bool),
    BlockConfig(BlockConfig, bool),
    Range(RangeKind, Bound, u32),
}

impl Command {
    fn apply(&self, config: &mut StripeConfig) {
        match self {
            Command::Split(kind, value) => {
                let field = match kind {
                    SplitKind::MceAndPleOutputHeight => {
                        &mut config.splits.mce_and_ple_output_height
                    }
                    SplitKind::MceOutputHeightOnly => &mut config.splits.mce_output_height_only,
                    SplitKind::WidthOnly => &mut config.splits.width_only,
                    SplitKind::WidthHeight => &mut config.splits.width_height,
                    SplitKind::WidthHeightOutputDepth => {
                        &mut config.splits.width_height_output_depth
                    }
                    SplitKind::WidthHeightOutputDepthInputDepth => {
                        &mut config.splits.width_height_output_depth_input_depth
                    }
                    SplitKind::OutputDepthInputDepth => {
                        &mut config.splits.output_depth_input_depth
                    }
                    SplitKind::MceAndPleOutputDepth => &mut config.splits.mce_and_ple_output_depth,
                    SplitKind::MceOutputDepthOnly => &mut config.splits.mce_output_depth_only,
                    SplitKind::None => &mut config.splits.none,
                };
                *field = *value;
            }
            Command::PlanType(cascade, value) => {
                let field = match cascade {
                    CascadeType::Lonely => &mut config.plan_types.lonely,
                    CascadeType::Beginning => &mut config.plan_types.beginning,
                    CascadeType::Middle => &mut config.plan_types.middle,
                    CascadeType::End => &mut config.plan_types.end,
                };
                *field = *value;
            }
            Command::BlockConfig(block, true) => {
                if !config.block_configs.contains(block) {
                    config.block_configs.push(*block);
                }
            }
            Command::BlockConfig(block, false) => {
                config.block_configs.retain(|b| b != block);
            }
            Command::Range(kind, bound, value) => {
                let range = match kind {
                    RangeKind::BlockWidthMultiplier => &mut config.block_width_multiplier,
                    RangeKind::BlockHeightMultiplier => &mut config.block_height_multiplier,
                    RangeKind::IfmDepthMultiplier => &mut config.ifm_depth_multiplier,
                    RangeKind::OfmDepthMultiplier => &mut config.ofm_depth_multiplier,
                    RangeKind::InputNumStripes => &mut config.num_stripes.input,
                    RangeKind::OutputNumStripes => &mut config.num_stripes.output,
                    RangeKind::WeightNumStripes => &mut config.num_stripes.weight,
                    RangeKind::PleInputNumStripes => &mut config.num_stripes.ple_input,
                };
                match bound {
                    Bound::Min => range.min = *value,
                    Bound::Max => range.max = *value,
                }
            }
        }
    }
}

struct Section {
    pattern: Regex,
    commands: Vec<Command>,
}

/// Parsed override rule file: ordered regex-keyed sections of
/// `Name=True|False` and `Name=<uint>` assignments.
pub struct StripeConfigRules {
    sections: Vec<Section>,
}

impl StripeConfigRules {
    /// Parses rule text. Any malformed line is a hard error carrying its
    /// 1-based line number.
    pub fn from_str(text: &str) -> Result<Self, StripeConfigError> {
        let mut sections: Vec<Section> = Vec::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line_number = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(pattern) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let pattern =
                    Regex::new(pattern).map_err(|_| StripeConfigError::BadSectionPattern {
                        line: line_number,
                        pattern: pattern.to_string(),
                    })?;
                sections.push(Section {
                    pattern,
                    commands: Vec::new(),
                });
                continue;
            }

            let (name, value) = line.split_once('=').ok_or_else(|| StripeConfigError::Syntax {
                line: line_number,
                contents: line.to_string(),
            })?;
            let command = parse_command(name.trim(), value.trim(), line_number)?;
            match sections.last_mut() {
                Some(section) => section.commands.push(command),
                // Assignments before any section header have nothing to
                // scope them to.
                None => {
                    return Err(StripeConfigError::Syntax {
                        line: line_number,
                        contents: line.to_string(),
                    });
                }
            }
        }

        Ok(Self { sections })
    }

    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, StripeConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    /// Loads rules from the file named by `STRIPEGEN_STRIPE_CONFIG`, if set.
    pub fn from_env() -> Result<Option<Self>, StripeConfigError> {
        match std::env::var("STRIPEGEN_STRIPE_CONFIG") {
            Ok(path) if !path.is_empty() => {
                log::debug!("Loading stripe config overrides from {path}");
                Self::from_file(path).map(Some)
            }
            _ => Ok(None),
        }
    }
}

fn parse_bool(name: &str, value: &str, line: usize) -> Result<bool, StripeConfigError> {
    match value {
        "True" => Ok(true),
        "False" => Ok(false),
        _ => Err(StripeConfigError::BadValue {
            line,
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_uint(name: &str, value: &str, line: usize) -> Result<u32, StripeConfigError> {
    value.parse().map_err(|_| StripeConfigError::BadValue {
        line,
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_command(name: &str, value: &str, line: usize) -> Result<Command, StripeConfigError> {
    let split = |kind| Ok(Command::Split(kind, parse_bool(name, value, line)?));
    let plan = |cascade| Ok(Command::PlanType(cascade, parse_bool(name, value, line)?));
    let range = |kind, bound| Ok(Command::Range(kind, bound, parse_uint(name, value, line)?));

    match name {
        "MceAndPleOutputHeight" => split(SplitKind::MceAndPleOutputHeight),
        "MceOutputHeightOnly" => split(SplitKind::MceOutputHeightOnly),
        "WidthOnly" => split(SplitKind::WidthOnly),
        "WidthHeight" => split(SplitKind::WidthHeight),
        "WidthHeightOutputDepth" => split(SplitKind::WidthHeightOutputDepth),
        "WidthHeightOutputDepthInputDepth" => {
            split(SplitKind::WidthHeightOutputDepthInputDepth)
        }
        "OutputDepthInputDepth" => split(SplitKind::OutputDepthInputDepth),
        "MceAndPleOutputDepth" => split(SplitKind::MceAndPleOutputDepth),
        "MceOutputDepthOnly" => split(SplitKind::MceOutputDepthOnly),
        "None" => split(SplitKind::None),

        "Lonely" => plan(CascadeType::Lonely),
        "Beginning" => plan(CascadeType::Beginning),
        "Middle" => plan(CascadeType::Middle),
        "End" => plan(CascadeType::End),

        "BlockWidthMultiplierMin" => range(RangeKind::BlockWidthMultiplier, Bound::Min),
        "BlockWidthMultiplierMax" => range(RangeKind::BlockWidthMultiplier, Bound::Max),
        "BlockHeightMultiplierMin" => range(RangeKind::BlockHeightMultiplier, Bound::Min),
        "BlockHeightMultiplierMax" => range(RangeKind::BlockHeightMultiplier, Bound::Max),
        "IfmDepthMultiplierMin" => range(RangeKind::IfmDepthMultiplier, Bound::Min),
        "IfmDepthMultiplierMax" => range(RangeKind::IfmDepthMultiplier, Bound::Max),
        "OfmDepthMultiplierMin" => range(RangeKind::OfmDepthMultiplier, Bound::Min),
        "OfmDepthMultiplierMax" => range(RangeKind::OfmDepthMultiplier, Bound::Max),

        "InputNumStripesMin" => range(RangeKind::InputNumStripes, Bound::Min),
        "InputNumStripesMax" => range(RangeKind::InputNumStripes, Bound::Max),
        "OutputNumStripesMin" => range(RangeKind::OutputNumStripes, Bound::Min),
        "OutputNumStripesMax" => range(RangeKind::OutputNumStripes, Bound::Max),
        "WeightNumStripesMin" => range(RangeKind::WeightNumStripes, Bound::Min),
        "WeightNumStripesMax" => range(RangeKind::WeightNumStripes, Bound::Max),
        "PleInputNumStripesMin" => range(RangeKind::PleInputNumStripes, Bound::Min),
        "PleInputNumStripesMax" => range(RangeKind::PleInputNumStripes, Bound::Max),

        _ => {
            if let Some(dims) = name.strip_prefix("BlockConfig") {
                let block = dims
                    .split_once('x')
                    .and_then(|(w, h)| Some(BlockConfig::new(w.parse().ok()?, h.parse().ok()?)));
                if let Some(block) = block {
                    return Ok(Command::BlockConfig(block, parse_bool(name, value, line)?));
                }
            }
            Err(StripeConfigError::UnknownName {
                line,
                name: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_enables_everything() {
        let config = StripeConfig::default();
        assert_eq!(config.splits, Splits::ALL);
        assert_eq!(config.plan_types, PlanTypes::ALL);
        assert_eq!(config.block_configs.len(), 6);
    }

    #[test]
    fn sections_apply_in_order_to_matching_parts() {
        let rules = StripeConfigRules::from_str(
            "# disable width splits everywhere, then re-enable for conv parts\n\
             [.*]\n\
             WidthOnly=False\n\
             WidthHeight=False\n\
             [conv.*]\n\
             WidthOnly=True\n",
        )
        .unwrap();

        let conv = StripeConfig::for_part("conv1", Some(&rules));
        assert!(conv.splits.width_only);
        assert!(!conv.splits.width_height);

        let pool = StripeConfig::for_part("pool1", Some(&rules));
        assert!(!pool.splits.width_only);

        let untouched = StripeConfig::for_part("conv1", None);
        assert!(untouched.splits.width_height);
    }

    #[test]
    fn block_configs_and_ranges() {
        let rules = StripeConfigRules::from_str(
            "[part]\n\
             BlockConfig16x16=False\n\
             BlockConfig8x32=False\n\
             IfmDepthMultiplierMax=4\n\
             OutputNumStripesMax=2\n",
        )
        .unwrap();
        let config = StripeConfig::for_part("part", Some(&rules));
        assert!(!config.block_configs.contains(&BlockConfig::new(16, 16)));
        assert!(!config.block_configs.contains(&BlockConfig::new(8, 32)));
        assert_eq!(config.block_configs.len(), 4);
        assert_eq!(config.ifm_depth_multiplier.max, 4);
        assert_eq!(config.num_stripes.output.max, 2);
    }

    #[test]
    fn parse_errors_carry_line_numbers() {
        match StripeConfigRules::from_str("[p]\nNotAnOption=True\n") {
            Err(StripeConfigError::UnknownName { line, name }) => {
                assert_eq!(line, 2);
                assert_eq!(name, "NotAnOption");
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }

        match StripeConfigRules::from_str("[p]\nWidthOnly=Maybe\n") {
            Err(StripeConfigError::BadValue { line, value, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(value, "Maybe");
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }

        match StripeConfigRules::from_str("WidthOnly=True\n") {
            Err(StripeConfigError::Syntax { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result: {:?}", other.err()),
        }

        match StripeConfigRules::from_str("[p]\nIfmDepthMultiplierMax=-3\n") {
            Err(StripeConfigError::BadValue { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected result: {:?}", other.err()),
        }

        assert!(matches!(
            StripeConfigRules::from_str("[(]\n"),
            Err(StripeConfigError::BadSectionPattern { line: 1, .. })
        ));
    }

    #[test]
    fn split_disable_helpers() {
        let mut config = StripeConfig::default();
        config.disable_split_width();
        assert!(!config.splits.width_only);
        assert!(!config.splits.width_height);
        assert!(!config.splits.width_height_output_depth);
        assert!(config.splits.mce_and_ple_output_height);

        let mut config = StripeConfig::default();
        config.disable_split_input_depth();
        assert!(!config.splits.width_height_output_depth_input_depth);
        assert!(!config.splits.output_depth_input_depth);
        assert!(config.splits.mce_and_ple_output_depth);

        let mut config = StripeConfig::default();
        config.disable_all_splits();
        assert_eq!(config.splits, Splits::NONE);
    }
}
