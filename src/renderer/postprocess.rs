use crate::renderer::targets::PingPongIndex;

/// A user-registered post-process effect: the name of a fixed-function
/// program plus the priority that orders it within the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostEffect {
    pub name: String,
    pub priority: i32,
}

impl PostEffect {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
        }
    }
}

/// A texture read by a post stage: the resolved scene color or one of the
/// two ping-pong targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexRef {
    Resolved,
    Ping(usize),
}

/// One stage of the chain. Every stage except the final passthrough writes a
/// ping-pong target; the passthrough writes the screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStage {
    /// Resolve the multisampled color attachment into a plain texture.
    ResolveScene,
    /// Resolve the multisampled brightness attachment into a ping target.
    ResolveBright { target: usize },
    BloomBlur {
        horizontal: bool,
        source: TexRef,
        target: usize,
    },
    BloomBlend {
        scene: TexRef,
        bloom: TexRef,
        target: usize,
    },
    Tonemap { source: TexRef, target: usize },
    Effect {
        name: String,
        source: TexRef,
        target: usize,
    },
    Passthrough { source: TexRef },
}

impl PostStage {
    pub fn writes(&self) -> Option<usize> {
        match self {
            PostStage::ResolveScene | PostStage::Passthrough { .. } => None,
            PostStage::ResolveBright { target }
            | PostStage::BloomBlur { target, .. }
            | PostStage::BloomBlend { target, .. }
            | PostStage::Tonemap { target, .. }
            | PostStage::Effect { target, .. } => Some(*target),
        }
    }

    pub fn reads(&self) -> Vec<TexRef> {
        match self {
            PostStage::ResolveScene | PostStage::ResolveBright { .. } => Vec::new(),
            PostStage::BloomBlur { source, .. }
            | PostStage::Tonemap { source, .. }
            | PostStage::Effect { source, .. }
            | PostStage::Passthrough { source } => vec![*source],
            PostStage::BloomBlend { scene, bloom, .. } => vec![*scene, *bloom],
        }
    }
}

/// The full chain for one frame, derived from the camera's output options.
/// Pure data; the renderer walks it issuing fullscreen passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostChainPlan {
    pub stages: Vec<PostStage>,
}

impl PostChainPlan {
    pub fn build(bloom_iterations: u32, hdr: bool, effects: &[PostEffect]) -> Self {
        let mut stages = vec![PostStage::ResolveScene];
        let mut index = PingPongIndex::new();
        let mut current = TexRef::Resolved;

        if bloom_iterations > 0 {
            let target = index.next();
            stages.push(PostStage::ResolveBright { target });
            let mut bloom = TexRef::Ping(target);

            let mut horizontal = true;
            for _ in 0..bloom_iterations {
                let target = index.next();
                stages.push(PostStage::BloomBlur {
                    horizontal,
                    source: bloom,
                    target,
                });
                bloom = TexRef::Ping(target);
                horizontal = !horizontal;
            }

            let target = index.next();
            stages.push(PostStage::BloomBlend {
                scene: current,
                bloom,
                target,
            });
            current = TexRef::Ping(target);
        }

        if hdr {
            let target = index.next();
            stages.push(PostStage::Tonemap {
                source: current,
                target,
            });
            current = TexRef::Ping(target);
        }

        for effect in effects {
            let target = index.next();
            stages.push(PostStage::Effect {
                name: effect.name.clone(),
                source: current,
                target,
            });
            current = TexRef::Ping(target);
        }

        stages.push(PostStage::Passthrough { source: current });
        Self { stages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_chain_is_resolve_then_passthrough() {
        let plan = PostChainPlan::build(0, false, &[]);
        assert_eq!(
            plan.stages,
            vec![
                PostStage::ResolveScene,
                PostStage::Passthrough {
                    source: TexRef::Resolved
                }
            ]
        );
    }

    #[test]
    fn no_stage_reads_its_own_write_target() {
        let effects = [PostEffect::new("grain", 0), PostEffect::new("vignette", 1)];
        for bloom in 0..5 {
            for hdr in [false, true] {
                let plan = PostChainPlan::build(bloom, hdr, &effects);
                for stage in &plan.stages {
                    if let Some(target) = stage.writes() {
                        assert!(
                            !stage.reads().contains(&TexRef::Ping(target)),
                            "stage {:?} reads its own write target",
                            stage
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn ping_targets_alternate_with_stage_parity() {
        let effects = [
            PostEffect::new("a", 0),
            PostEffect::new("b", 1),
            PostEffect::new("c", 2),
        ];
        let plan = PostChainPlan::build(3, true, &effects);

        let writes: Vec<usize> = plan.stages.iter().filter_map(PostStage::writes).collect();
        for (n, target) in writes.iter().enumerate() {
            // Stage 1 writes A (0), stage 2 writes B (1), and so on.
            assert_eq!(*target, n % 2);
        }
    }

    #[test]
    fn blur_stages_alternate_direction_and_chain_sources() {
        let plan = PostChainPlan::build(3, false, &[]);
        let blurs: Vec<&PostStage> = plan
            .stages
            .iter()
            .filter(|s| matches!(s, PostStage::BloomBlur { .. }))
            .collect();
        assert_eq!(blurs.len(), 3);

        let mut expected_horizontal = true;
        let mut previous = None;
        for stage in blurs {
            let PostStage::BloomBlur {
                horizontal,
                source,
                target,
            } = stage
            else {
                unreachable!()
            };
            assert_eq!(*horizontal, expected_horizontal);
            if let Some(prev) = previous {
                assert_eq!(*source, TexRef::Ping(prev));
            }
            previous = Some(*target);
            expected_horizontal = !expected_horizontal;
        }
    }

    #[test]
    fn effects_run_after_tonemap_and_before_passthrough() {
        let effects = [PostEffect::new("grain", 0)];
        let plan = PostChainPlan::build(0, true, &effects);

        let kinds: Vec<&str> = plan
            .stages
            .iter()
            .map(|s| match s {
                PostStage::ResolveScene => "resolve",
                PostStage::ResolveBright { .. } => "bright",
                PostStage::BloomBlur { .. } => "blur",
                PostStage::BloomBlend { .. } => "blend",
                PostStage::Tonemap { .. } => "tonemap",
                PostStage::Effect { .. } => "effect",
                PostStage::Passthrough { .. } => "passthrough",
            })
            .collect();
        assert_eq!(kinds, ["resolve", "tonemap", "effect", "passthrough"]);
    }

    #[test]
    fn final_stage_always_targets_the_screen() {
        for bloom in [0, 2] {
            let plan = PostChainPlan::build(bloom, true, &[PostEffect::new("grain", 0)]);
            assert!(matches!(
                plan.stages.last(),
                Some(PostStage::Passthrough { .. })
            ));
        }
    }
}
