//! Header and footer lines drawn around every printed page.
//! 每頁上下方的頁首與頁尾文字。
//!
//! A line is written with `&` codes: `&l`, `&c` and `&r` switch the slot the
//! following text goes to; `&w` (title), `&u` (url), `&p` (page), `&P` (page
//! count), `&d` (date) and `&t` (time) are replaced when the page is drawn.
//! `&&` is a literal ampersand.

use thiserror::Error;

use crate::printed_document::PrintedDocument;
use crate::printed_page::PrintedPage;

/// Value substituted into an overlay line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayField {
    Title,
    Url,
    Page,
    PageCount,
    Date,
    Time,
}

/// Piece of one slot: literal text or a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayPart {
    Text(String),
    Field(OverlayField),
}

/// Slot of a header or footer line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    pub const ALL: [Alignment; 3] = [Alignment::Left, Alignment::Center, Alignment::Right];

    fn index(self) -> usize {
        match self {
            Alignment::Left => 0,
            Alignment::Center => 1,
            Alignment::Right => 2,
        }
    }
}

/// 解析 overlay 字串時的錯誤。 / Errors raised while parsing an overlay line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    #[error("unknown overlay code '&{0}'")]
    UnknownCode(char),
}

enum Code {
    Slot(Alignment),
    Field(OverlayField),
    Ampersand,
}

fn decode(code: char) -> Result<Code, OverlayError> {
    let decoded = match code {
        '&' => Code::Ampersand,
        'l' | 'L' => Code::Slot(Alignment::Left),
        'c' | 'C' => Code::Slot(Alignment::Center),
        'r' | 'R' => Code::Slot(Alignment::Right),
        'w' | 'W' => Code::Field(OverlayField::Title),
        'u' | 'U' => Code::Field(OverlayField::Url),
        'p' => Code::Field(OverlayField::Page),
        'P' => Code::Field(OverlayField::PageCount),
        'd' | 'D' => Code::Field(OverlayField::Date),
        't' | 'T' => Code::Field(OverlayField::Time),
        other => return Err(OverlayError::UnknownCode(other)),
    };
    Ok(decoded)
}

/// Parsed overlay line, one list of parts per slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlayTemplate {
    slots: [Vec<OverlayPart>; 3],
}

impl OverlayTemplate {
    pub fn parse(input: &str) -> Result<Self, OverlayError> {
        let mut slots: [Vec<OverlayPart>; 3] = Default::default();
        let mut current = Alignment::Left;
        let mut text = String::new();
        let mut chars = input.chars();

        while let Some(ch) = chars.next() {
            if ch != '&' {
                text.push(ch);
                continue;
            }
            // A lone trailing '&' stays literal.
            let Some(code) = chars.next() else {
                text.push('&');
                break;
            };
            match decode(code)? {
                Code::Ampersand => text.push('&'),
                Code::Slot(next) => {
                    push_text(&mut slots[current.index()], &mut text);
                    current = next;
                }
                Code::Field(field) => {
                    push_text(&mut slots[current.index()], &mut text);
                    slots[current.index()].push(OverlayPart::Field(field));
                }
            }
        }
        push_text(&mut slots[current.index()], &mut text);
        Ok(Self { slots })
    }

    pub fn parts(&self, alignment: Alignment) -> &[OverlayPart] {
        &self.slots[alignment.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Vec::is_empty)
    }

    pub fn render(&self, values: &OverlayValues<'_>) -> RenderedOverlay {
        RenderedOverlay {
            slots: self.slots.clone().map(|parts| {
                parts.iter().fold(String::new(), |mut line, part| {
                    match part {
                        OverlayPart::Text(text) => line.push_str(text),
                        OverlayPart::Field(field) => line.push_str(&values.get(*field)),
                    }
                    line
                })
            }),
        }
    }
}

fn push_text(slot: &mut Vec<OverlayPart>, text: &mut String) {
    if !text.is_empty() {
        slot.push(OverlayPart::Text(std::mem::take(text)));
    }
}

/// Header and footer lines attached to print settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageOverlays {
    pub header: OverlayTemplate,
    pub footer: OverlayTemplate,
}

impl PageOverlays {
    pub fn new(header: &str, footer: &str) -> Result<Self, OverlayError> {
        Ok(Self {
            header: OverlayTemplate::parse(header)?,
            footer: OverlayTemplate::parse(footer)?,
        })
    }
}

/// Values available to an overlay line. Missing values render as nothing.
#[derive(Debug, Clone, Default)]
pub struct OverlayValues<'a> {
    pub title: &'a str,
    pub url: &'a str,
    pub page: u32,
    pub page_count: Option<u32>,
    pub date: &'a str,
    pub time: &'a str,
}

impl OverlayValues<'_> {
    fn get(&self, field: OverlayField) -> String {
        match field {
            OverlayField::Title => self.title.to_string(),
            OverlayField::Url => self.url.to_string(),
            OverlayField::Page => self.page.to_string(),
            OverlayField::PageCount => self
                .page_count
                .map(|count| count.to_string())
                .unwrap_or_default(),
            OverlayField::Date => self.date.to_string(),
            OverlayField::Time => self.time.to_string(),
        }
    }
}

/// Expanded text of an overlay line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedOverlay {
    slots: [String; 3],
}

impl RenderedOverlay {
    pub fn slot(&self, alignment: Alignment) -> &str {
        &self.slots[alignment.index()]
    }
}

/// Expands `template` for `page` of `document`.
pub fn replace_variables(
    template: &OverlayTemplate,
    document: &PrintedDocument,
    page: &PrintedPage,
) -> RenderedOverlay {
    let page_count = document.page_count();
    template.render(&OverlayValues {
        title: document.name(),
        url: document.url(),
        page: page.page_number(),
        page_count: (page_count > 0).then_some(page_count),
        date: document.date(),
        time: document.time(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> OverlayPart {
        OverlayPart::Text(value.to_string())
    }

    #[test]
    fn codes_switch_slots_and_insert_fields() {
        let template = OverlayTemplate::parse("&w&cPage &p of &P&r&d").unwrap();
        assert_eq!(
            template.parts(Alignment::Left),
            [OverlayPart::Field(OverlayField::Title)]
        );
        assert_eq!(
            template.parts(Alignment::Center),
            [
                text("Page "),
                OverlayPart::Field(OverlayField::Page),
                text(" of "),
                OverlayPart::Field(OverlayField::PageCount),
            ]
        );
        assert_eq!(
            template.parts(Alignment::Right),
            [OverlayPart::Field(OverlayField::Date)]
        );
    }

    #[test]
    fn render_fills_every_slot() {
        let template = OverlayTemplate::parse("&l&w && co&r&t").unwrap();
        let rendered = template.render(&OverlayValues {
            title: "Minutes",
            time: "09:30:00",
            page: 1,
            ..Default::default()
        });
        assert_eq!(rendered.slot(Alignment::Left), "Minutes & co");
        assert_eq!(rendered.slot(Alignment::Center), "");
        assert_eq!(rendered.slot(Alignment::Right), "09:30:00");
    }

    #[test]
    fn unknown_page_count_renders_empty() {
        let template = OverlayTemplate::parse("&r&p/&P").unwrap();
        let values = OverlayValues {
            page: 4,
            ..Default::default()
        };
        assert_eq!(template.render(&values).slot(Alignment::Right), "4/");
    }

    #[test]
    fn stray_ampersand_and_bad_codes() {
        let template = OverlayTemplate::parse("50%&").unwrap();
        assert_eq!(template.parts(Alignment::Left), [text("50%&")]);
        assert!(OverlayTemplate::parse("").unwrap().is_empty());
        assert_eq!(
            OverlayTemplate::parse("&q"),
            Err(OverlayError::UnknownCode('q'))
        );
    }
}
