//! Codec-switch decision and state machine.
//!
//! Two signatures are compared after normalization to (basic container type,
//! base codec tokens). Equal pairs are stable. A differing pair switches in
//! place unless one of the [`ResetReason`]s in [`RESET_PRIORITY`] applies, in
//! which case the whole session is reset.

use std::fmt;

use bl_core::config::CodecSwitchingStrategy;
use bl_core::{ContentType, TypeSignature};

/// How a codec switch is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStrategy {
    /// Change the buffer's type in place.
    InPlace,
    /// Tear down and recreate the session and every buffer.
    Reset,
}

impl fmt::Display for SwitchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InPlace => write!(f, "in_place"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Condition forcing a reset instead of an in-place switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// Muxed content is split into separate buffers.
    SplitMuxedContent,
    /// The configured strategy always reloads.
    ReloadStrategy,
    /// The platform has no usable in-place type change.
    ChangeTypeUnavailable,
    /// An earlier in-place change was rejected as unsupported.
    ChangeTypeBroken,
}

/// Reset conditions in the order they are checked.
pub const RESET_PRIORITY: [ResetReason; 4] = [
    ResetReason::SplitMuxedContent,
    ResetReason::ReloadStrategy,
    ResetReason::ChangeTypeUnavailable,
    ResetReason::ChangeTypeBroken,
];

impl ResetReason {
    fn applies(self, caps: &SwitchCapabilities) -> bool {
        match self {
            Self::SplitMuxedContent => caps.split_muxed_content,
            Self::ReloadStrategy => caps.strategy == CodecSwitchingStrategy::Reload,
            Self::ChangeTypeUnavailable => !caps.change_type_supported,
            Self::ChangeTypeBroken => caps.change_type_broken,
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SplitMuxedContent => "split muxed content",
            Self::ReloadStrategy => "reload strategy",
            Self::ChangeTypeUnavailable => "change type unavailable",
            Self::ChangeTypeBroken => "change type broken",
        };
        f.write_str(s)
    }
}

/// Platform and configuration inputs to a switch decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchCapabilities {
    pub strategy: CodecSwitchingStrategy,
    /// Configured platform support and the session's own capability.
    pub change_type_supported: bool,
    pub change_type_broken: bool,
    pub split_muxed_content: bool,
}

/// First applicable reset condition, if any.
pub fn reset_reason(caps: &SwitchCapabilities) -> Option<ResetReason> {
    RESET_PRIORITY.into_iter().find(|r| r.applies(caps))
}

/// A decided switch.
#[derive(Debug, Clone, PartialEq)]
pub struct CodecSwitch {
    pub content_type: ContentType,
    pub from: TypeSignature,
    pub to: TypeSignature,
    pub strategy: SwitchStrategy,
    pub reason: Option<ResetReason>,
}

/// Outcome of evaluating a property change.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchDecision {
    Stable,
    Switch(CodecSwitch),
}

/// Pure decision function shared by the state machine and the
/// reset-necessity query.
pub fn decide(
    content_type: ContentType,
    from: &TypeSignature,
    to: &TypeSignature,
    caps: &SwitchCapabilities,
) -> SwitchDecision {
    if from.normalized() == to.normalized() {
        return SwitchDecision::Stable;
    }
    let reason = reset_reason(caps);
    let strategy = if reason.is_some() {
        SwitchStrategy::Reset
    } else {
        SwitchStrategy::InPlace
    };
    SwitchDecision::Switch(CodecSwitch {
        content_type,
        from: from.clone(),
        to: to.clone(),
        strategy,
        reason,
    })
}

/// State of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwitchState {
    #[default]
    Stable,
    Evaluating,
    InPlace,
    Reset,
}

/// Tracks the switch in progress and whether in-place switching has proven
/// unreliable on this platform.
#[derive(Debug, Default)]
pub struct CodecSwitchMachine {
    state: SwitchState,
    change_type_broken: bool,
    switches: u32,
    resets: u32,
}

impl CodecSwitchMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    pub fn change_type_broken(&self) -> bool {
        self.change_type_broken
    }

    /// Fold the machine's learned state into the capabilities.
    pub fn capabilities(&self, mut caps: SwitchCapabilities) -> SwitchCapabilities {
        caps.change_type_broken |= self.change_type_broken;
        caps
    }

    /// Evaluate a property change; leaves the machine in `InPlace` or `Reset`
    /// for a switch, or back in `Stable`.
    pub fn evaluate(
        &mut self,
        content_type: ContentType,
        from: &TypeSignature,
        to: &TypeSignature,
        caps: SwitchCapabilities,
    ) -> SwitchDecision {
        self.state = SwitchState::Evaluating;
        let decision = decide(content_type, from, to, &self.capabilities(caps));
        self.state = match &decision {
            SwitchDecision::Stable => SwitchState::Stable,
            SwitchDecision::Switch(switch) => {
                self.switches += 1;
                match switch.strategy {
                    SwitchStrategy::InPlace => SwitchState::InPlace,
                    SwitchStrategy::Reset => {
                        self.resets += 1;
                        SwitchState::Reset
                    }
                }
            }
        };
        decision
    }

    /// The switch in progress finished (successfully or not).
    pub fn complete(&mut self) {
        self.state = SwitchState::Stable;
    }

    /// The platform rejected an in-place change as unsupported.
    pub fn mark_change_type_broken(&mut self) {
        if !self.change_type_broken {
            tracing::warn!("In-place type change rejected by platform; future switches will reset");
        }
        self.change_type_broken = true;
    }

    pub fn switch_count(&self) -> u32 {
        self.switches
    }

    pub fn reset_count(&self) -> u32 {
        self.resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smooth() -> SwitchCapabilities {
        SwitchCapabilities {
            strategy: CodecSwitchingStrategy::Smooth,
            change_type_supported: true,
            change_type_broken: false,
            split_muxed_content: false,
        }
    }

    fn sig(mime: &str, codecs: &str) -> TypeSignature {
        TypeSignature::new(mime, codecs)
    }

    #[test]
    fn same_normalized_pair_is_stable() {
        let pairs = [
            (sig("video/mp4", "avc1.64001f"), sig("video/mp4", "avc3.4d401e")),
            (sig("video/mp4", "hvc1.1.6.L93.90"), sig("Video/MP4", "hev1.2.4.L120.90")),
            (sig("audio/mp4", "mp4a.40.2"), sig("audio/mp4", "mp4a.40.5")),
            (sig("video/mp4", "avc1.64001f,mp4a.40.2"), sig("video/mp4", "mp4a.40.29,avc1.4d401f")),
        ];
        let reload = SwitchCapabilities {
            strategy: CodecSwitchingStrategy::Reload,
            ..smooth()
        };
        for (a, b) in &pairs {
            assert_eq!(decide(ContentType::Video, a, b, &smooth()), SwitchDecision::Stable);
            assert_eq!(decide(ContentType::Video, a, b, &reload), SwitchDecision::Stable);
        }
    }

    #[test]
    fn differing_pair_with_smooth_switching_is_in_place() {
        let d = decide(
            ContentType::Audio,
            &sig("audio/mp4", "mp4a.40.2"),
            &sig("audio/mp4", "ec-3"),
            &smooth(),
        );
        match d {
            SwitchDecision::Switch(s) => {
                assert_eq!(s.strategy, SwitchStrategy::InPlace);
                assert_eq!(s.reason, None);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn container_change_alone_switches() {
        let d = decide(
            ContentType::Video,
            &sig("video/mp4", "avc1.64001f"),
            &sig("video/mp2t", "avc1.64001f"),
            &smooth(),
        );
        assert!(matches!(d, SwitchDecision::Switch(_)));
    }

    #[test]
    fn reset_priority_order() {
        let all = SwitchCapabilities {
            strategy: CodecSwitchingStrategy::Reload,
            change_type_supported: false,
            change_type_broken: true,
            split_muxed_content: true,
        };
        assert_eq!(reset_reason(&all), Some(ResetReason::SplitMuxedContent));
        let no_split = SwitchCapabilities {
            split_muxed_content: false,
            ..all
        };
        assert_eq!(reset_reason(&no_split), Some(ResetReason::ReloadStrategy));
        let smooth_unavailable = SwitchCapabilities {
            strategy: CodecSwitchingStrategy::Smooth,
            ..no_split
        };
        assert_eq!(reset_reason(&smooth_unavailable), Some(ResetReason::ChangeTypeUnavailable));
        let broken_only = SwitchCapabilities {
            change_type_supported: true,
            ..smooth_unavailable
        };
        assert_eq!(reset_reason(&broken_only), Some(ResetReason::ChangeTypeBroken));
        assert_eq!(reset_reason(&smooth()), None);
    }

    #[test]
    fn machine_falls_back_to_reset_after_broken_change_type() {
        let mut machine = CodecSwitchMachine::new();
        let avc = sig("video/mp4", "avc1.64001f");
        let hevc = sig("video/mp4", "hvc1.1.6.L93.90");

        let first = machine.evaluate(ContentType::Video, &avc, &hevc, smooth());
        assert_eq!(machine.state(), SwitchState::InPlace);
        assert!(matches!(first, SwitchDecision::Switch(CodecSwitch { strategy: SwitchStrategy::InPlace, .. })));
        machine.mark_change_type_broken();
        machine.complete();
        assert_eq!(machine.state(), SwitchState::Stable);

        let second = machine.evaluate(ContentType::Video, &avc, &hevc, smooth());
        assert_eq!(machine.state(), SwitchState::Reset);
        match second {
            SwitchDecision::Switch(s) => assert_eq!(s.reason, Some(ResetReason::ChangeTypeBroken)),
            other => panic!("unexpected decision: {other:?}"),
        }
        assert_eq!(machine.switch_count(), 2);
        assert_eq!(machine.reset_count(), 1);
    }

    #[test]
    fn stable_evaluation_returns_to_stable() {
        let mut machine = CodecSwitchMachine::new();
        let avc = sig("video/mp4", "avc1.64001f");
        assert_eq!(
            machine.evaluate(ContentType::Video, &avc, &avc, smooth()),
            SwitchDecision::Stable
        );
        assert_eq!(machine.state(), SwitchState::Stable);
    }
}
