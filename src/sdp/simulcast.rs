//! Simulcast SSRC synthesis for local descriptions.

use std::{cell::RefCell, collections::HashMap};

use rand::Rng as _;

use crate::sdp::{
    GroupSemantics, SectionKind, SessionDescription, SsrcGroup, SsrcLine,
};

/// Number of simulcast layers sent for a source.
pub const SIMULCAST_LAYERS: usize = 3;

/// Expands single-SSRC sending video sections into simulcast groups.
///
/// Native stacks only allocate one SSRC per sender; SSRC-based simulcast
/// towards the SFU needs the extra layers declared in the local
/// description. Synthesized SSRCs are cached per primary so that
/// renegotiations keep announcing the same layer identities.
#[derive(Debug, Default)]
pub struct SimulcastInjector {
    /// Cached `primary -> [layer ssrcs]` expansions.
    cache: RefCell<HashMap<u32, Vec<u32>>>,
}

impl SimulcastInjector {
    /// Creates a new [`SimulcastInjector`] with an empty cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all cached expansions.
    #[inline]
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Returns a copy of the provided description where every sending
    /// video section with a single primary SSRC declares
    /// [`SIMULCAST_LAYERS`] primaries under a SIM group.
    ///
    /// Sections already carrying a SIM group pass through unchanged.
    #[must_use]
    pub fn inject(&self, desc: &SessionDescription) -> SessionDescription {
        let mut out = desc.clone();
        for section in &mut out.media {
            if section.kind != SectionKind::Video
                || !section.direction_or_default().is_sending()
            {
                continue;
            }
            if section
                .ssrc_groups
                .iter()
                .any(|g| g.semantics == GroupSemantics::Sim)
            {
                continue;
            }
            let primaries = section.primary_ssrcs();
            let primary = match primaries.as_slice() {
                [single] => *single,
                _ => continue,
            };

            let mut taken = section.distinct_ssrcs();
            taken.extend(
                self.cache.borrow().values().flatten().copied(),
            );
            let layers = self
                .cache
                .borrow_mut()
                .entry(primary)
                .or_insert_with(|| {
                    let mut layers = vec![primary];
                    while layers.len() < SIMULCAST_LAYERS {
                        let ssrc = generate_ssrc(&taken, &layers);
                        layers.push(ssrc);
                    }
                    layers
                })
                .clone();

            for layer in layers.iter().skip(1) {
                for attribute in ["cname", "msid"].iter() {
                    if let Some(value) = section
                        .ssrc_attr(primary, attribute)
                        .map(ToOwned::to_owned)
                    {
                        section.ssrc_lines.push(SsrcLine {
                            ssrc: *layer,
                            attribute: (*attribute).to_owned(),
                            value: Some(value),
                        });
                    }
                }
            }
            section.ssrc_groups.insert(
                0,
                SsrcGroup {
                    semantics: GroupSemantics::Sim,
                    ssrcs: layers,
                },
            );
        }
        out
    }
}

fn generate_ssrc(taken: &[u32], layers: &[u32]) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = rng.gen_range(1..u32::MAX);
        if !taken.contains(&candidate) && !layers.contains(&candidate) {
            return candidate;
        }
    }
}
