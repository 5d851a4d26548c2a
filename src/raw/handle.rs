use core::num::NonZeroU32;

/// Stable index of a slot in an [`Arena`](super::arena::Arena).
///
/// Backed by a `NonZeroU32` so `Option<Handle>` takes the same four bytes
/// as `Handle` itself; parent and sibling links are navigational fields
/// and must stay cheap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct Handle(NonZeroU32);

impl Handle {
    pub(crate) const MAX: usize = (u32::MAX - 1) as usize;

    #[inline]
    pub(crate) fn from_index(index: usize) -> Self {
        assert!(index <= Self::MAX, "`Handle::from_index()` - `index` > `Handle::MAX`!");
        // `index + 1` cannot be zero and cannot overflow.
        #[allow(clippy::cast_possible_truncation)]
        let raw = (index + 1) as u32;
        Self(NonZeroU32::new(raw).unwrap())
    }

    #[inline]
    pub(crate) const fn to_index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}
