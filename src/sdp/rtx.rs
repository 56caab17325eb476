//! RTX pairing of local video SSRCs.

use std::{cell::RefCell, collections::HashMap};

use rand::Rng as _;

use crate::sdp::{
    GroupSemantics, SectionKind, SessionDescription, SsrcGroup, SsrcLine,
};

/// Injects RTX pairs for primary video SSRCs lacking one.
///
/// Associations survive across renegotiations: once a primary has been
/// paired, re-running the modifier reuses the same RTX SSRC, keeping
/// retransmission identities stable for the far end.
#[derive(Debug, Default)]
pub struct RtxModifier {
    /// Cached `primary -> rtx` associations.
    cache: RefCell<HashMap<u32, u32>>,
}

impl RtxModifier {
    /// Creates a new [`RtxModifier`] with an empty association cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all cached associations.
    #[inline]
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Returns a copy of the provided description where every primary
    /// video SSRC is paired with an RTX SSRC through a FID group.
    ///
    /// The injected RTX SSRC inherits the `cname` and `msid` of its
    /// primary.
    #[must_use]
    pub fn modify_rtx_ssrcs(
        &self,
        desc: &SessionDescription,
    ) -> SessionDescription {
        let mut out = desc.clone();
        for section in &mut out.media {
            if section.kind != SectionKind::Video {
                continue;
            }
            let paired: Vec<u32> = section
                .ssrc_groups
                .iter()
                .filter(|g| g.semantics == GroupSemantics::Fid)
                .filter_map(|g| g.ssrcs.first().copied())
                .collect();
            let mut taken = section.distinct_ssrcs();
            taken.extend(self.cache.borrow().values().copied());

            for primary in section.primary_ssrcs() {
                if paired.contains(&primary) {
                    continue;
                }
                let rtx = *self
                    .cache
                    .borrow_mut()
                    .entry(primary)
                    .or_insert_with(|| generate_ssrc(&taken));
                taken.push(rtx);

                for attribute in ["cname", "msid"].iter() {
                    if let Some(value) = section
                        .ssrc_attr(primary, attribute)
                        .map(ToOwned::to_owned)
                    {
                        section.ssrc_lines.push(SsrcLine {
                            ssrc: rtx,
                            attribute: (*attribute).to_owned(),
                            value: Some(value),
                        });
                    }
                }
                section.ssrc_groups.push(SsrcGroup {
                    semantics: GroupSemantics::Fid,
                    ssrcs: vec![primary, rtx],
                });
            }
        }
        out
    }
}

/// Generates a random SSRC not present in `taken`.
fn generate_ssrc(taken: &[u32]) -> u32 {
    let mut rng = rand::thread_rng();
    loop {
        let candidate = rng.gen_range(1..u32::MAX);
        if !taken.contains(&candidate) {
            return candidate;
        }
    }
}
