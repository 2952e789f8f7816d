use num_traits::Float;

/// Median of `values`, reordering the slice in place. NaNs sort last.
///
/// Even-sized inputs average the two middle elements.
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    let n = values.len();
    if n == 0 {
        return None;
    }

    let cmp = |a: &T, b: &T| a.partial_cmp(b).unwrap_or_else(|| a.is_nan().cmp(&b.is_nan()));

    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, cmp);
    let upper = *upper;

    if n % 2 == 1 {
        return Some(upper);
    }

    let lower = lower
        .iter()
        .copied()
        .max_by(|a, b| cmp(a, b))
        .unwrap_or(upper);

    Some((lower + upper) / (T::one() + T::one()))
}
