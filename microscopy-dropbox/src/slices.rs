//! Series selections such as `all`, `0,2` or `1:8:2`.

use std::collections::BTreeSet;

use crate::error::{Error, Result};

fn bad(selection: &str) -> Error {
    Error::invalid("series selection", selection)
}

/// Resolve a possibly negative index against `count`.
fn absolute(index: isize, count: isize) -> isize {
    if index < 0 {
        index + count
    } else {
        index
    }
}

fn range(segment: &str, count: isize) -> Result<Vec<usize>> {
    let bounds: Vec<Option<isize>> = segment
        .split(':')
        .map(|p| match p.trim() {
            "" => Ok(None),
            t => t.parse().map(Some).map_err(|_| bad(segment)),
        })
        .collect::<Result<_>>()?;
    if bounds.len() > 3 {
        return Err(bad(segment));
    }
    let step = bounds.get(2).copied().flatten().unwrap_or(1);
    if step == 0 {
        return Err(bad(segment));
    }
    let clamp_low = if step > 0 { 0 } else { -1 };
    let clamp_high = if step > 0 { count } else { count - 1 };
    let clamp = |v: isize| absolute(v, count).clamp(clamp_low, clamp_high);
    let (default_start, default_stop) = if step > 0 { (0, count) } else { (count - 1, -1) };
    let start = bounds[0].map(clamp).unwrap_or(default_start);
    let stop = bounds.get(1).copied().flatten().map(clamp).unwrap_or(default_stop);

    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        i += step;
    }
    Ok(out)
}

/// Sorted, unique series numbers selected out of `count`.
pub fn parse_selection(selection: &str, count: usize) -> Result<Vec<usize>> {
    let selection = selection.trim();
    if selection.eq_ignore_ascii_case("all") {
        return Ok((0..count).collect());
    }
    let n = count as isize;
    let mut picked = BTreeSet::new();
    for segment in selection.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if segment.contains(':') {
            picked.extend(range(segment, n)?);
            continue;
        }
        let index: isize = segment.parse().map_err(|_| bad(segment))?;
        let resolved = absolute(index, n);
        if !(0..n).contains(&resolved) {
            return Err(bad(segment));
        }
        picked.insert(resolved as usize);
    }
    Ok(picked.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_lists() {
        assert_eq!(parse_selection("all", 3).unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_selection("2, 0,2", 3).unwrap(), vec![0, 2]);
        assert_eq!(parse_selection("-1", 4).unwrap(), vec![3]);
    }

    #[test]
    fn ranges_clamp_to_count() {
        assert_eq!(parse_selection("0:3", 10).unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_selection("1:8:3", 5).unwrap(), vec![1, 4]);
        assert_eq!(parse_selection("::-2", 5).unwrap(), vec![0, 2, 4]);
        assert_eq!(parse_selection(":", 2).unwrap(), vec![0, 1]);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_selection("5", 3).is_err());
        assert!(parse_selection("0:2:0", 3).is_err());
        assert!(parse_selection("a", 3).is_err());
        assert!(parse_selection("1:2:3:4", 9).is_err());
    }
}
