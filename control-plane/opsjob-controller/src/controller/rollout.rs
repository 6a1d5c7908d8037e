use super::candidate::OpsCandidate;

/// Indices of the candidates eligible to be operated on in this pass.
///
/// Without a partition, or with one covering every candidate, all candidates
/// are eligible in declaration order. Otherwise candidates are stably ordered
/// with not-yet-started ones first and the first `partition` are returned.
/// A negative partition selects nothing.
pub fn decide_candidates_by_partition(
    partition: Option<i32>,
    candidates: &[OpsCandidate],
) -> Vec<usize> {
    let all: Vec<usize> = (0..candidates.len()).collect();
    let Some(partition) = partition else {
        return all;
    };
    let partition = usize::try_from(partition).unwrap_or(0);
    if partition >= candidates.len() {
        return all;
    }

    // Not-started candidates sort first on every pass, so `partition` bounds
    // how many targets are picked per pass, not how many are ever operated:
    // once the first picks have started, a later pass moves on to fresh ones.
    let mut ordered = all;
    // sort_by_key is stable: ties keep declaration order
    ordered.sort_by_key(|&i| !candidates[i].is_ops_not_started());
    ordered.truncate(partition);
    ordered
}
