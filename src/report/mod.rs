use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::synthesis::SynthesisResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFailure {
    pub event: String,
    pub states: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpaceInfo {
    pub total_states: usize,
    pub total_arcs: usize,
    pub reachable_states: usize,
    pub events: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub tool_name: String,
    pub system: String,
    pub properties: String,
    pub success: bool,
    pub strategies: Vec<String>,
    pub places: usize,
    pub regions: Vec<String>,
    pub failed_event_separation: Vec<EventFailure>,
    pub failed_state_separation: Vec<Vec<String>>,
    /// Failures the constraint backend gave up on instead of refuting.
    #[serde(default)]
    pub inconclusive: usize,
    pub analysis_time: Duration,
    pub state_space_info: Option<StateSpaceInfo>,
    pub error: Option<String>,
}

impl fmt::Display for SynthesisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Petri 网合成报告")?;
        writeln!(f, "合成工具: {}", self.tool_name)?;
        writeln!(f, "迁移系统: {}", self.system)?;
        writeln!(f, "目标性质: {}", self.properties)?;
        writeln!(f, "分离策略: {}", self.strategies.join(", "))?;
        writeln!(f, "分析时间: {:?}", self.analysis_time)?;
        writeln!(f, "合成成功: {}", self.success)?;

        if !self.regions.is_empty() {
            writeln!(f, "\n共 {} 个库所:", self.places)?;
            for (i, region) in self.regions.iter().enumerate() {
                writeln!(f, "  p{}: {}", i, region)?;
            }
        }

        if !self.failed_event_separation.is_empty() {
            writeln!(f, "\n未能阻止的事件:")?;
            for failure in &self.failed_event_separation {
                writeln!(f, "  {}: {}", failure.event, failure.states.join(", "))?;
            }
        }

        if !self.failed_state_separation.is_empty() {
            writeln!(f, "\n无法区分的状态:")?;
            for (i, class) in self.failed_state_separation.iter().enumerate() {
                writeln!(f, "  #{}: {{{}}}", i + 1, class.join(", "))?;
            }
        }

        if self.inconclusive > 0 {
            writeln!(f, "\n求解器放弃的实例: {} (失败结论不完整)", self.inconclusive)?;
        }

        if let Some(space_info) = &self.state_space_info {
            writeln!(f, "\n状态空间信息:")?;
            writeln!(f, "总状态数: {}", space_info.total_states)?;
            writeln!(f, "总弧数: {}", space_info.total_arcs)?;
            writeln!(f, "可达状态数: {}", space_info.reachable_states)?;
            writeln!(f, "事件数: {}", space_info.events)?;
        }

        if let Some(error) = &self.error {
            writeln!(f, "\n错误信息: {}", error)?;
        }

        Ok(())
    }
}

impl SynthesisReport {
    pub fn new(tool_name: String) -> Self {
        Self {
            tool_name,
            system: String::new(),
            properties: String::new(),
            success: false,
            strategies: Vec::new(),
            places: 0,
            regions: Vec::new(),
            failed_event_separation: Vec::new(),
            failed_state_separation: Vec::new(),
            inconclusive: 0,
            analysis_time: Duration::default(),
            state_space_info: None,
            error: None,
        }
    }

    pub fn from_result(tool_name: String, result: &SynthesisResult, analysis_time: Duration) -> Self {
        let utility = result.utility();
        let ts = utility.ts();
        let state_names = |states: &[crate::ts::StateId]| {
            states
                .iter()
                .map(|&s| utility.state_name(s).to_string())
                .collect::<Vec<_>>()
        };
        Self {
            system: ts.name().to_string(),
            properties: result.properties().to_string(),
            success: result.is_success(),
            strategies: result.strategies().iter().map(|s| s.to_string()).collect(),
            places: result.regions().len(),
            regions: result
                .regions()
                .iter()
                .map(|r| r.display_with(utility).to_string())
                .collect(),
            failed_event_separation: result
                .failed_event_separation()
                .iter()
                .map(|(&event, states)| EventFailure {
                    event: utility.event_label(event).to_string(),
                    states: state_names(states),
                })
                .collect(),
            failed_state_separation: result
                .failed_state_separation()
                .iter()
                .map(|class| state_names(class))
                .collect(),
            inconclusive: result.inconclusive(),
            analysis_time,
            state_space_info: Some(StateSpaceInfo {
                total_states: ts.state_count(),
                total_arcs: ts.arc_count(),
                reachable_states: utility.reachable_states().len(),
                events: utility.event_count(),
            }),
            ..Self::new(tool_name)
        }
    }

    /// Writes the text report to `path` and its JSON form next to it (`<path>.json`).
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        use std::fs::File;
        use std::io::Write;

        let mut file = File::create(path)?;
        writeln!(file, "{}", self)?;

        let mut json_path = path.as_os_str().to_owned();
        json_path.push(".json");
        std::fs::write(json_path, serde_json::to_string_pretty(self)?.as_bytes())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::PnProperties;
    use crate::synthesis::{SynthesisFlags, synthesize};
    use crate::ts::TransitionSystem;
    use crate::{cancel::CancelToken, config::SynthConfig};

    fn report_for(ts: &TransitionSystem) -> SynthesisReport {
        let result = synthesize(
            ts,
            PnProperties::new(),
            SynthesisFlags::empty(),
            &SynthConfig::default(),
            &CancelToken::new(),
        )
        .unwrap();
        SynthesisReport::from_result("pn-synth".to_string(), &result, Duration::from_millis(3))
    }

    #[test]
    fn failures_are_named() {
        let mut ts = TransitionSystem::new("s");
        ts.add_arc_named("s", "a", "t1");
        ts.add_arc_named("s", "a", "t2");
        let report = report_for(&ts);
        assert!(!report.success);
        assert_eq!(
            report.failed_state_separation,
            vec![vec!["t1".to_string(), "t2".to_string()]]
        );
        let text = report.to_string();
        assert!(text.contains("无法区分的状态"));
        assert!(text.contains("{t1, t2}"));
    }

    #[test]
    fn serializes_to_json() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        let report = report_for(&ts);
        assert!(report.success);
        let json = serde_json::to_string(&report).unwrap();
        let back: SynthesisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.places, report.places);
        assert_eq!(back.state_space_info.unwrap().events, 1);
    }

    #[test]
    fn saves_text_and_json_side_by_side() {
        let mut ts = TransitionSystem::new("s0");
        ts.add_arc_named("s0", "a", "s1");
        let report = report_for(&ts);
        let path = std::env::temp_dir().join(format!("pn-synth-report-{}.txt", std::process::id()));
        report.save_to_file(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("合成成功: true"));
        let json_path = path.with_extension("txt.json");
        let back: SynthesisReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(back.places, report.places);
        assert_eq!(back.inconclusive, 0);

        std::fs::remove_file(&path).unwrap();
        std::fs::remove_file(&json_path).unwrap();
    }
}
