//! Choosing one host among sibling mirrors of the same audio.

use crate::content::{ContentTree, NodeId};
use crate::extractor::AudioHost;

/// Direct children of `parent` that lose to a better-ranked sibling host.
///
/// The winning host is the present host with the lowest index in `priority`;
/// when none of the present hosts is ranked, the host of the first member
/// wins. Every member of the winning host is kept, members of other hosts
/// are returned. Children without a host never compete, and neither do
/// files that are not audio.
#[must_use]
pub fn choose_mirrors(tree: &ContentTree, parent: NodeId, priority: &[AudioHost]) -> Vec<NodeId> {
    let members: Vec<(NodeId, AudioHost)> = tree
        .children(parent)
        .iter()
        .filter(|child| tree.file(**child).is_none_or(|f| f.is_audio))
        .filter_map(|child| {
            tree.extractor(*child)
                .audio_host()
                .map(|host| (*child, host))
        })
        .collect();

    let rank = |host: AudioHost| priority.iter().position(|h| *h == host);
    let winner = members
        .iter()
        .filter_map(|(_, host)| rank(*host).map(|r| (r, *host)))
        .min_by_key(|(r, _)| *r)
        .map(|(_, host)| host)
        .or_else(|| members.first().map(|(_, host)| *host));

    let Some(winner) = winner else {
        return Vec::new();
    };
    members
        .into_iter()
        .filter(|(_, host)| *host != winner)
        .map(|(node, _)| node)
        .collect()
}
