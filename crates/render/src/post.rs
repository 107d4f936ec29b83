//! Post-process chain planning.
//!
//! Stages alternate between the two auxiliary targets: stage `i` reads the
//! primary color (i = 0) or `aux[(i - 1) % 2]` and writes `aux[i % 2]`. With
//! no stages the primary color is copied into aux A, so the final image is
//! always determined by the stage count alone.

use crate::config::{PostEffectDesc, PostEffectKind};

/// A color texture the pipeline can read or present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSource {
    /// Color channel of the primary target, before post-processing.
    Primary,
    AuxA,
    AuxB,
    History,
}

impl ColorSource {
    /// Auxiliary target for ping-pong slot `index`.
    pub fn aux(index: usize) -> Self {
        if index % 2 == 0 { Self::AuxA } else { Self::AuxB }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::AuxA => "aux_a",
            Self::AuxB => "aux_b",
            Self::History => "history",
        }
    }
}

/// Read and write targets of chain stage `index`.
pub fn stage_io(index: usize) -> (ColorSource, ColorSource) {
    let src = if index == 0 {
        ColorSource::Primary
    } else {
        ColorSource::aux(index - 1)
    };
    (src, ColorSource::aux(index))
}

/// Target holding the final image after `stages` chain stages.
pub fn final_source(stages: usize) -> ColorSource {
    if stages == 0 {
        ColorSource::AuxA
    } else {
        ColorSource::aux(stages - 1)
    }
}

/// Why an optional effect could not be set up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EffectInitError {
    #[error("effect {0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error("effect {name} failed to initialize: {reason}")]
    Backend { name: &'static str, reason: String },
}

/// A configured effect and whether it is usable.
#[derive(Debug, Clone, PartialEq)]
pub struct PostEffect {
    pub kind: PostEffectKind,
    /// Cleared when initialization failed or the effect is switched off.
    pub enabled: bool,
    pub init_error: Option<EffectInitError>,
}

impl PostEffect {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// One unit of work in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStage {
    /// Index into `PostChain::effects`.
    Effect(usize),
    Outline,
    Temporal,
}

/// The generic effects in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostChain {
    effects: Vec<PostEffect>,
}

impl PostChain {
    /// Initialize every configured effect with `init`. An effect whose
    /// initialization fails is kept but disabled, with one warning.
    pub fn init<F>(descs: &[PostEffectDesc], mut init: F) -> Self
    where
        F: FnMut(&PostEffectKind) -> Result<(), EffectInitError>,
    {
        let effects = descs
            .iter()
            .map(|desc| {
                if !desc.enabled {
                    return PostEffect {
                        kind: desc.kind.clone(),
                        enabled: false,
                        init_error: None,
                    };
                }
                match init(&desc.kind) {
                    Ok(()) => PostEffect {
                        kind: desc.kind.clone(),
                        enabled: true,
                        init_error: None,
                    },
                    Err(err) => {
                        tracing::warn!(effect = desc.kind.name(), %err, "post effect disabled");
                        PostEffect {
                            kind: desc.kind.clone(),
                            enabled: false,
                            init_error: Some(err),
                        }
                    }
                }
            })
            .collect();
        Self { effects }
    }

    pub fn effects(&self) -> &[PostEffect] {
        &self.effects
    }

    pub fn effect(&self, index: usize) -> Option<&PostEffect> {
        self.effects.get(index)
    }

    /// Names of effects skipped because their initialization failed.
    pub fn failed(&self) -> Vec<&'static str> {
        self.effects
            .iter()
            .filter(|e| e.init_error.is_some())
            .map(PostEffect::name)
            .collect()
    }

    /// Stages for one frame: enabled effects, then the outline, then the
    /// temporal resolve, which is always last.
    pub fn plan(&self, outline: bool, temporal: bool) -> Vec<ChainStage> {
        let mut stages: Vec<ChainStage> = self
            .effects
            .iter()
            .enumerate()
            .filter(|(_, e)| e.enabled)
            .map(|(i, _)| ChainStage::Effect(i))
            .collect();
        if outline {
            stages.push(ChainStage::Outline);
        }
        if temporal {
            stages.push(ChainStage::Temporal);
        }
        stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tonemap() -> PostEffectDesc {
        PostEffectDesc::new(PostEffectKind::Tonemap { exposure: 1.0 })
    }

    fn vignette() -> PostEffectDesc {
        PostEffectDesc::new(PostEffectKind::Vignette {
            strength: 0.5,
            radius: 0.7,
        })
    }

    #[test]
    fn stages_never_read_and_write_same_target() {
        for i in 0..8 {
            let (src, dst) = stage_io(i);
            assert_ne!(src, dst);
            assert_ne!(dst, ColorSource::Primary);
        }
    }

    #[test]
    fn each_stage_reads_previous_output() {
        for i in 1..8 {
            assert_eq!(stage_io(i).0, stage_io(i - 1).1);
        }
    }

    #[test]
    fn final_source_by_parity() {
        assert_eq!(final_source(0), ColorSource::AuxA);
        assert_eq!(final_source(1), ColorSource::AuxA);
        assert_eq!(final_source(2), ColorSource::AuxB);
        assert_eq!(final_source(3), ColorSource::AuxA);
        assert_eq!(final_source(4), ColorSource::AuxB);
        for n in 1..8 {
            assert_eq!(final_source(n), stage_io(n - 1).1);
        }
    }

    #[test]
    fn failed_init_disables_effect() {
        let chain = PostChain::init(&[tonemap(), vignette()], |kind| match kind {
            PostEffectKind::Vignette { .. } => Err(EffectInitError::Unsupported(kind.name())),
            _ => Ok(()),
        });
        assert!(chain.effects()[0].enabled);
        assert!(!chain.effects()[1].enabled);
        assert_eq!(chain.failed(), vec!["vignette"]);
        assert_eq!(chain.plan(false, false), vec![ChainStage::Effect(0)]);
    }

    #[test]
    fn disabled_in_config_is_not_initialized() {
        let mut off = vignette();
        off.enabled = false;
        let mut calls = 0;
        let chain = PostChain::init(&[off], |_| {
            calls += 1;
            Ok(())
        });
        assert_eq!(calls, 0);
        assert!(chain.failed().is_empty());
        assert!(chain.plan(false, false).is_empty());
    }

    #[test]
    fn temporal_is_last() {
        let chain = PostChain::init(&[tonemap(), vignette()], |_| Ok(()));
        let plan = chain.plan(true, true);
        assert_eq!(
            plan,
            vec![
                ChainStage::Effect(0),
                ChainStage::Effect(1),
                ChainStage::Outline,
                ChainStage::Temporal
            ]
        );
    }
}
