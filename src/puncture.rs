use crate::rate::CodeRate;

/// Drop the mother-code outputs that are not transmitted at `rate`
pub fn puncture<T: Copy>(coded: &[T], rate: CodeRate) -> Vec<T> {
    let pattern = rate.puncture_pattern();
    coded
        .iter()
        .zip(pattern.iter().cycle())
        .filter(|(_, keep)| **keep)
        .map(|(c, _)| *c)
        .collect()
}

/// Put erasures (zero LLRs) back where punctured bits were, returning a rate 1/2 stream. The
/// output always ends on a whole puncturing period.
pub fn depuncture(llrs: &[f32], rate: CodeRate) -> Vec<f32> {
    let pattern = rate.puncture_pattern();
    let kept = pattern.iter().filter(|k| **k).count();
    let mut res = Vec::with_capacity(llrs.len() * pattern.len() / kept + pattern.len());
    let mut input = llrs.iter();
    let mut pos = 0;
    loop {
        if pattern[pos % pattern.len()] {
            match input.next() {
                Some(l) => res.push(*l),
                None => break,
            }
        } else {
            res.push(0.);
        }
        pos += 1;
    }
    // Finish the period with erasures
    while res.len() % pattern.len() != 0 {
        res.push(0.);
    }
    res
}
