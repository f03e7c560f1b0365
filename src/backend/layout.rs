// Vertex layout descriptor
//
// Ordered list of vertex attributes with the stride derived from them.
// Slot i is the i-th attribute added.

/// Scalar type of one attribute component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Int,
    Float,
}

impl ComponentType {
    /// Size of one component in bytes
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::Int => std::mem::size_of::<i32>() as u32,
            Self::Float => std::mem::size_of::<f32>() as u32,
        }
    }
}

/// One vertex attribute: `count` components of type `ty`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeLayout {
    pub count: u8,
    pub ty: ComponentType,
    /// Only honored for float attributes
    pub normalized: bool,
}

impl AttributeLayout {
    pub const fn byte_size(&self) -> u32 {
        self.count as u32 * self.ty.byte_size()
    }
}

/// Builder for the attribute layout of a vertex buffer.
///
/// The stride always equals the sum of the attribute sizes; there is no way
/// to set it independently. Counts are not validated here, the device
/// rejects anything outside 1..=4 when the layout is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    attributes: Vec<AttributeLayout>,
    stride: u32,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_attribute(&mut self, ty: ComponentType, count: u8, normalized: bool) -> &mut Self {
        let attribute = AttributeLayout { count, ty, normalized };
        self.stride += attribute.byte_size();
        self.attributes.push(attribute);
        self
    }

    pub fn attributes(&self) -> &[AttributeLayout] {
        &self.attributes
    }

    /// Bytes between consecutive vertices
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// `(slot, attribute, byte offset)` for each attribute in slot order.
    /// Offsets are the running sum of the sizes of the preceding attributes.
    pub fn offsets(&self) -> impl Iterator<Item = (u32, &AttributeLayout, u32)> + '_ {
        self.attributes
            .iter()
            .enumerate()
            .scan(0u32, |offset, (slot, attribute)| {
                let at = *offset;
                *offset += attribute.byte_size();
                Some((slot as u32, attribute, at))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_accumulates() {
        let mut layout = VertexLayout::new();
        assert_eq!(layout.stride(), 0);
        layout
            .add_attribute(ComponentType::Float, 3, false)
            .add_attribute(ComponentType::Float, 2, false)
            .add_attribute(ComponentType::Int, 1, false);
        assert_eq!(layout.stride(), 24);
        assert_eq!(layout.attributes().len(), 3);
    }

    #[test]
    fn offsets_are_prefix_sums() {
        let mut layout = VertexLayout::new();
        layout
            .add_attribute(ComponentType::Float, 3, false)
            .add_attribute(ComponentType::Float, 4, true)
            .add_attribute(ComponentType::Int, 2, false);
        let offsets: Vec<(u32, u32)> = layout.offsets().map(|(slot, _, at)| (slot, at)).collect();
        assert_eq!(offsets, vec![(0, 0), (1, 12), (2, 28)]);

        let last = layout.offsets().last().unwrap();
        assert_eq!(last.2 + last.1.byte_size(), layout.stride());
    }

    #[test]
    fn counts_are_not_validated() {
        let mut layout = VertexLayout::new();
        layout.add_attribute(ComponentType::Float, 7, false);
        assert_eq!(layout.stride(), 28);
    }
}
