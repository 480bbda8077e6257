//! Advance widths (1/1000 em) for the two base-14 fonts the report uses,
//! covering printable ASCII. Anything else is measured as a digit.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    pub fn resource_name(self) -> &'static [u8] {
        match self {
            Font::Regular => b"F1",
            Font::Bold => b"F2",
        }
    }

    pub fn base_font(self) -> &'static str {
        match self {
            Font::Regular => "Helvetica",
            Font::Bold => "Helvetica-Bold",
        }
    }
}

const FALLBACK_WIDTH: u32 = 556;

#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

fn glyph_width(font: Font, ch: char) -> u32 {
    let table = match font {
        Font::Regular => &HELVETICA,
        Font::Bold => &HELVETICA_BOLD,
    };
    match ch {
        ' '..='~' => u32::from(table[ch as usize - 0x20]),
        _ => FALLBACK_WIDTH,
    }
}

/// Width of `text` in thousandths of a point at `size` points.
pub fn text_width_milli(font: Font, size: i64, text: &str) -> i64 {
    let em: i64 = text.chars().map(|ch| i64::from(glyph_width(font, ch))).sum();
    em * size
}

/// Width of `text` in whole points, rounded to nearest.
pub fn text_width(font: Font, size: i64, text: &str) -> i64 {
    (text_width_milli(font, size, text) + 500) / 1000
}

/// Longest prefix of `text` that fits `max_width` points, with a trailing
/// ellipsis when anything was cut.
pub fn fit_text(font: Font, size: i64, text: &str, max_width: i64) -> String {
    if text_width(font, size, text) <= max_width {
        return text.to_string();
    }
    let ellipsis = "...";
    let budget = max_width * 1000 - text_width_milli(font, size, ellipsis);
    let mut used = 0_i64;
    let mut out = String::new();
    for ch in text.chars() {
        let w = i64::from(glyph_width(font, ch)) * size;
        if used + w > budget {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push_str(ellipsis);
    out
}

/// Map text to single-byte WinAnsi codes; characters outside Latin-1 become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match u32::from(ch) {
            0x20..=0x7e | 0xa0..=0xff => ch as u32 as u8,
            _ => b'?',
        })
        .collect()
}
