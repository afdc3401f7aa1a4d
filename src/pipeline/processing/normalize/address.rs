//! Structural rewrite of Japanese street addresses.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const PREFECTURES: [&str; 47] = [
    "北海道", "青森県", "岩手県", "宮城県", "秋田県", "山形県", "福島県", "茨城県", "栃木県",
    "群馬県", "埼玉県", "千葉県", "東京都", "神奈川県", "新潟県", "富山県", "石川県", "福井県",
    "山梨県", "長野県", "岐阜県", "静岡県", "愛知県", "三重県", "滋賀県", "京都府", "大阪府",
    "兵庫県", "奈良県", "和歌山県", "鳥取県", "島根県", "岡山県", "広島県", "山口県", "徳島県",
    "香川県", "愛媛県", "高知県", "福岡県", "佐賀県", "長崎県", "熊本県", "大分県", "宮崎県",
    "鹿児島県", "沖縄県",
];

static PREFECTURE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("^(?:{})", PREFECTURES.join("|"))).expect("prefecture pattern")
});
// leading city only; ward and town names that contain 市 are kept
static CITY_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s区町村]+?市").expect("city pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));
static HYPHENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new("[\u{FF0D}\u{2014}\u{2015}\u{2212}\u{2010}\u{2011}\u{2012}\u{2013}\u{FE63}\u{FE58}]")
        .expect("hyphen pattern")
});
static KANJI_CHOME: Lazy<Regex> =
    Lazy::new(|| Regex::new("([〇一二三四五六七八九十]+)丁目").expect("kanji chome pattern"));
static CHOME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)丁目").expect("chome pattern"));
static BANCHI_NO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)番地の(\d+号?)").expect("banchi-no pattern"));
static BANCHI: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)番地?(\d+号?)").expect("banchi pattern"));
static BANCHI_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)番地?$").expect("banchi tail"));
static HYPHEN_RUN: Lazy<Regex> = Lazy::new(|| Regex::new("-+").expect("hyphen run"));
static PERIODS: Lazy<Regex> = Lazy::new(|| Regex::new("[.．]").expect("period pattern"));

/// Apply the address rewrites in their fixed order.
pub fn rewrite_address(address: &str) -> String {
    let s = PREFECTURE_PREFIX.replace(address, "");
    let s = CITY_TOKEN.replacen(&s, 1, "");
    let s = WHITESPACE.replace_all(&s, "");
    let s = HYPHENS.replace_all(&s, "-");
    let s = KANJI_CHOME.replace_all(&s, |caps: &Captures| match kanji_to_arabic(&caps[1]) {
        Some(n) => format!("{}丁目", n),
        None => caps[0].to_string(),
    });
    let s = CHOME.replace_all(&s, "${1}-");
    let s = BANCHI_NO.replace_all(&s, "${1}-${2}");
    let s = BANCHI.replace_all(&s, "${1}-${2}");
    let s = BANCHI_TAIL.replace_all(&s, "${1}");
    let s = HYPHEN_RUN.replace_all(&s, "-");
    let s = s.strip_suffix('-').unwrap_or(&s);
    PERIODS.replace_all(s, "").into_owned()
}

/// Kanji numeral to its value; handles a single 十 (十一, 二十, 二十三) and
/// digit-by-digit forms (一〇). `None` when the value does not fit a `u32`.
pub fn kanji_to_arabic(kanji: &str) -> Option<u32> {
    let digit = |c: char| match c {
        '〇' => Some(0),
        '一' => Some(1),
        '二' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    };
    let mut total: u32 = 0;
    let mut pending: u32 = 0;
    for c in kanji.chars() {
        if c == '十' {
            let tens = if pending == 0 { 10 } else { pending.checked_mul(10)? };
            total = total.checked_add(tens)?;
            pending = 0;
        } else if let Some(d) = digit(c) {
            pending = pending.checked_mul(10)?.checked_add(d)?;
        }
    }
    total.checked_add(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kanji_numerals() {
        assert_eq!(kanji_to_arabic("三"), Some(3));
        assert_eq!(kanji_to_arabic("十"), Some(10));
        assert_eq!(kanji_to_arabic("十二"), Some(12));
        assert_eq!(kanji_to_arabic("二十三"), Some(23));
        assert_eq!(kanji_to_arabic("一〇"), Some(10));
    }

    #[test]
    fn test_oversized_kanji_chome_left_as_is() {
        assert_eq!(kanji_to_arabic("九九九九九九九九九九九"), None);
        assert_eq!(
            rewrite_address("本町九九九九九九九九九九九丁目1"),
            "本町九九九九九九九九九九九丁目1"
        );
    }

    #[test]
    fn test_prefecture_and_city_removed() {
        assert_eq!(rewrite_address("北海道札幌市中央区北1条西2"), "中央区北1条西2");
        assert_eq!(rewrite_address("神奈川県横浜市西区1-2"), "西区1-2");
        assert_eq!(rewrite_address("京都府京都市左京区市原町1"), "左京区市原町1");
        assert_eq!(rewrite_address("千葉県市川市八幡2"), "八幡2");
    }

    #[test]
    fn test_prefecture_only_at_start() {
        assert_eq!(rewrite_address("大阪府大阪市北区"), "北区");
        assert_eq!(rewrite_address("中央区東京都"), "中央区東京都");
    }

    #[test]
    fn test_chome_and_banchi() {
        assert_eq!(rewrite_address("本町3丁目5番地7号"), "本町3-5-7号");
        assert_eq!(rewrite_address("本町三丁目5番地の7"), "本町3-5-7");
        assert_eq!(rewrite_address("本町十二丁目8番地"), "本町12-8");
        assert_eq!(rewrite_address("本町2丁目"), "本町2");
    }

    #[test]
    fn test_hyphens_spaces_periods() {
        assert_eq!(rewrite_address("本町 1－2—3"), "本町1-2-3");
        assert_eq!(rewrite_address("本町1--2-"), "本町1-2");
        assert_eq!(rewrite_address("本町1.2"), "本町12");
        // the long vowel mark is not a hyphen
        assert_eq!(rewrite_address("センター1"), "センター1");
    }
}
