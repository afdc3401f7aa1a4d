//! Width folding and kana disambiguation for Japanese address text.

const HALFWIDTH_KANA: &str =
    "ｦｧｨｩｪｫｬｭｮｯｰｱｲｳｴｵｶｷｸｹｺｻｼｽｾｿﾀﾁﾂﾃﾄﾅﾆﾇﾈﾉﾊﾋﾌﾍﾎﾏﾐﾑﾒﾓﾔﾕﾖﾗﾘﾙﾚﾛﾜﾝﾞﾟ";
const FULLWIDTH_KANA: &str =
    "ヲァィゥェォャュョッーアイウエオカキクケコサシスセソタチツテトナニヌネノハヒフヘホマミムメモヤユヨラリルレロワン゛゜";

const VOICED_MARK: char = '゛';
const SEMI_VOICED_MARK: char = '゜';

/// Standalone katakana read as particles, with their hiragana replacements
const AMBIGUOUS_KANA: [(char, char); 3] = [('ノ', 'の'), ('ケ', 'が'), ('ツ', 'つ')];

pub fn fullwidth_digits_to_halfwidth(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            other => other,
        })
        .collect()
}

/// Half-width katakana to full-width, folding a trailing voicing mark into
/// the preceding kana.
pub fn halfwidth_kana_to_fullwidth(text: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(text.len());
    for c in text.chars() {
        let c = widen(c);
        match (c, out.last().copied()) {
            (VOICED_MARK, Some(prev)) if voiced(prev).is_some() => {
                out.pop();
                out.extend(voiced(prev));
            }
            (SEMI_VOICED_MARK, Some(prev)) if semi_voiced(prev).is_some() => {
                out.pop();
                out.extend(semi_voiced(prev));
            }
            _ => out.push(c),
        }
    }
    out.into_iter().collect()
}

fn widen(c: char) -> char {
    HALFWIDTH_KANA
        .chars()
        .position(|h| h == c)
        .and_then(|i| FULLWIDTH_KANA.chars().nth(i))
        .unwrap_or(c)
}

fn voiced(c: char) -> Option<char> {
    match c {
        'ウ' => Some('ヴ'),
        'カ' | 'キ' | 'ク' | 'ケ' | 'コ' | 'サ' | 'シ' | 'ス' | 'セ' | 'ソ' | 'タ' | 'チ' | 'ツ'
        | 'テ' | 'ト' | 'ハ' | 'ヒ' | 'フ' | 'ヘ' | 'ホ' => char::from_u32(c as u32 + 1),
        _ => None,
    }
}

fn semi_voiced(c: char) -> Option<char> {
    match c {
        'ハ' | 'ヒ' | 'フ' | 'ヘ' | 'ホ' => char::from_u32(c as u32 + 2),
        _ => None,
    }
}

pub fn is_katakana(c: char) -> bool {
    ('ァ'..='ン').contains(&c)
}

/// Replace ノ/ケ/ツ with の/が/つ where neither neighbour is katakana.
///
/// One pass per character, each pass reading the output of the previous one.
pub fn disambiguate_standalone_kana(text: &str) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    for (target, replacement) in AMBIGUOUS_KANA {
        let snapshot = chars.clone();
        for (i, c) in snapshot.iter().enumerate() {
            if *c != target {
                continue;
            }
            let before = i.checked_sub(1).map(|j| snapshot[j]);
            let after = snapshot.get(i + 1).copied();
            if !before.is_some_and(is_katakana) && !after.is_some_and(is_katakana) {
                chars[i] = replacement;
            }
        }
    }
    chars.into_iter().collect()
}
