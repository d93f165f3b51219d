/// Ring arithmetic helpers.
///
/// All helpers stay in unsigned arithmetic by adding `size` before taking the
/// remainder, so rank 0's left neighbour is `size - 1` rather than `-1`.
pub struct Ring;

impl Ring {
    /// Get left neighbour in ring (the rank we receive from)
    pub fn left(rank: usize, size: usize) -> usize {
        (rank + size - 1) % size
    }

    /// Get right neighbour in ring (the rank we send to)
    pub fn right(rank: usize, size: usize) -> usize {
        (rank + 1) % size
    }

    /// Rank whose original shard `rank` holds after `step` rotations.
    pub fn origin(rank: usize, step: usize, size: usize) -> usize {
        (rank + size - step % size) % size
    }
}
