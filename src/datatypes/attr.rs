// ABOUTME: Defines the (property, color) attribute pair carried on every message frame
// ABOUTME: Implements the known palette slots with conversion from raw header digits

use num_enum::TryFromPrimitive;

/// The attribute pair prepended to every message frame.
///
/// Both fields ride the wire as two ASCII digits, so values are always in
/// `0..=99`. Unknown values round-trip untouched; only the slots named by
/// [`Property`] and [`Color`] carry meaning for rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Attr {
    pub property: u8,
    pub color: u8,
}

impl Attr {
    /// Plain text.
    pub const STANDARD: Attr = Attr::new(0, 0);
    /// Emphasized text.
    pub const HIGHLIGHT: Attr = Attr::new(0, 1);
    /// Emphasized, replaced by the next line of its kind.
    pub const NOTICE: Attr = Attr::new(1, 1);
    /// Emphasized, removable in bulk once its purpose is over.
    pub const SCAFFOLDING: Attr = Attr::new(3, 1);
    /// The default for chat traffic; the latest line of this kind is marked.
    pub const DYNAMIC: Attr = Attr::new(0, 2);
    pub const CRITICAL: Attr = Attr::new(0, 3);
    /// Critical, temporary.
    pub const CAUTION: Attr = Attr::new(1, 3);
    pub const ALERT: Attr = Attr::new(0, 4);
    /// Alert, temporary.
    pub const WARNING: Attr = Attr::new(1, 4);
    pub const SUCCESS: Attr = Attr::new(0, 5);
    /// Success, temporary.
    pub const APPROVE: Attr = Attr::new(1, 5);
    pub const DIM: Attr = Attr::new(0, 6);
    /// Dim, temporary.
    pub const GHOST: Attr = Attr::new(1, 6);
    pub const DEBUG: Attr = Attr::new(0, 7);

    /// Build an attribute pair. Values keep only their last two digits, the
    /// same truncation the header applies.
    pub const fn new(property: u8, color: u8) -> Attr {
        Attr {
            property: property % 100,
            color: color % 100,
        }
    }

    /// The known property slot, if this frame uses one.
    pub fn property(&self) -> Option<Property> {
        Property::try_from(self.property).ok()
    }

    /// The known palette slot, if this frame uses one.
    pub fn color(&self) -> Option<Color> {
        Color::try_from(self.color).ok()
    }
}

impl Default for Attr {
    fn default() -> Attr {
        Attr::DYNAMIC
    }
}

/// How a rendered line behaves in the scrollback.
#[derive(TryFromPrimitive)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Property {
    /// Stays put.
    Normal = 0,
    /// Replaced by the next line added.
    Temporary = 1,
    /// The last line of this kind is highlighted.
    Dynamic = 2,
    /// Cleared by a bulk scrap.
    Removable = 3,
}

/// Palette slot selected by the color field.
#[derive(TryFromPrimitive)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Standard = 0,
    Highlight = 1,
    Dynamic = 2,
    Critical = 3,
    Alert = 4,
    Success = 5,
    Dim = 6,
    Debug = 7,
    Custom1 = 8,
    Custom2 = 9,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_truncates_to_two_digits() {
        let attr = Attr::new(123, 205);
        assert_eq!(attr.property, 23);
        assert_eq!(attr.color, 5);
    }

    #[test]
    fn known_slots_resolve() {
        assert_eq!(Attr::DYNAMIC.property(), Some(Property::Normal));
        assert_eq!(Attr::DYNAMIC.color(), Some(Color::Dynamic));
        assert_eq!(Attr::SCAFFOLDING.property(), Some(Property::Removable));
    }

    #[test]
    fn unknown_slots_resolve_to_none() {
        let attr = Attr::new(47, 47);
        assert_eq!(attr.property(), None);
        assert_eq!(attr.color(), None);
    }

    #[test]
    fn default_is_dynamic() {
        assert_eq!(Attr::default(), Attr::DYNAMIC);
    }
}
