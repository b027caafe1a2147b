//! Planner-style lexicographic order hints.
//!
//! Positions within a bucket are plain strings over the printable-ASCII
//! range; sorting the strings sorts the items. Insertion between two
//! neighbours generates a midpoint string, so reordering never rewrites
//! sibling hints.

/// Lowest hint character.
const MIN_CHAR: u8 = b'!';
/// Highest hint character.
const MAX_CHAR: u8 = b'~';
/// Digit value one past the largest: stands in for an unbounded upper limit.
const CAP: u16 = (MAX_CHAR - MIN_CHAR + 2) as u16;

/// Digit value of position `i`: 0 when absent, 1..=94 for characters.
fn digit(s: &str, i: usize) -> u16 {
    s.as_bytes()
        .get(i)
        .map_or(0, |&c| (c - MIN_CHAR + 1) as u16)
}

fn to_char(d: u16) -> u8 {
    (d as u8 - 1) + MIN_CHAR
}

/// Hint assigned to the first element of an empty sequence.
pub fn initial_hint() -> String {
    // Mid-alphabet start leaves room on both sides.
    "P".to_string()
}

/// Generate a hint strictly between `lower` and `upper`.
///
/// `None` bounds mean "before the first" / "after the last" element. The
/// result satisfies `lower < result < upper` under byte-wise comparison;
/// when the gap closes the hint grows by one character. Callers must pass
/// `lower < upper`; hints generated here never end in the lowest character,
/// which keeps every gap splittable.
pub fn between(lower: Option<&str>, upper: Option<&str>) -> String {
    let lo = lower.unwrap_or("");
    let mut out: Vec<u8> = Vec::new();
    let mut i = 0usize;
    // Set once the bound can no longer constrain the remaining digits.
    let mut lo_done = false;
    let mut hi_done = upper.is_none();

    loop {
        let dl = if lo_done { 0 } else { digit(lo, i) };
        let dh = if hi_done {
            CAP
        } else {
            digit(upper.unwrap_or(""), i)
        };

        if !hi_done && dl == dh {
            // Shared digit; copy and descend.
            out.push(to_char(dl));
            i += 1;
            continue;
        }

        if dh > dl + 1 {
            // Room at this digit: take the midpoint and stop.
            let mid = (dl + dh) / 2;
            out.push(to_char(mid));
            if mid == 1 {
                // Keep hints splittable: never terminate on the lowest char.
                out.push(to_char((1 + CAP) / 2));
            }
            return String::from_utf8(out).expect("hint characters are ASCII");
        }

        // dh == dl + 1: adjacent digits, no room here.
        if dl >= 1 {
            // Stay on the lower digit; the upper bound stops constraining.
            out.push(to_char(dl));
            hi_done = true;
        } else {
            // dl absent, dh is the lowest char: take it; the lower bound is
            // exhausted and stops constraining.
            out.push(to_char(dh));
            lo_done = true;
        }
        i += 1;
    }
}
