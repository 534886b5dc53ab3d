//! Position-based crossover shared by the linear genomes.

use rand::Rng;

/// Draws `count` cut points uniformly in `[0, len)`, sorted ascending.
///
/// Duplicates are kept; two equal cut points cancel each other out.
pub fn cut_points<R>(rng: &mut R, len: usize, count: usize) -> Vec<usize>
where
    R: Rng + ?Sized,
{
    if len == 0 {
        return Vec::new();
    }
    let mut points: Vec<usize> = (0..count).map(|_| rng.random_range(0..len)).collect();
    points.sort_unstable();
    points
}

/// Exchanges the segments of two equal-length sequences between alternating cut points.
///
/// Exchange is on at position `0` and toggles at every cut point, so a single cut at `p`
/// exchanges the prefix `[0, p)` and keeps the suffix.
///
/// # Panics
///
/// Panics if the sequences have different lengths.
pub fn exchange_segments<T>(a: &mut [T], b: &mut [T], points: &[usize]) {
    assert_eq!(a.len(), b.len(), "crossover between genomes of different length");
    let mut exchange = true;
    let mut next = 0;
    for j in 0..a.len() {
        while next < points.len() && points[next] <= j {
            exchange = !exchange;
            next += 1;
        }
        if exchange {
            std::mem::swap(&mut a[j], &mut b[j]);
        }
    }
}

/// Multi-point crossover of two equal-length sequences.
///
/// # Returns
///
/// Two children; at every position the children hold the two parents' values, one each.
pub fn multi_point<T, R>(a: &[T], b: &[T], count: usize, rng: &mut R) -> (Vec<T>, Vec<T>)
where
    T: Clone,
    R: Rng + ?Sized,
{
    let points = cut_points(rng, a.len(), count);
    let mut c1 = a.to_vec();
    let mut c2 = b.to_vec();
    exchange_segments(&mut c1, &mut c2, &points);
    (c1, c2)
}
