use crate::bitmap::{Bitmap, words_for};
use crate::{PageEntryBits, VmemError};
use kernel_info::memory::NODE_POOL_CAPACITY;
use kernel_memory_addresses::PhysicalAddress;
use log::{error, trace};

/// Index of a node inside a [`NodePool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle(u32);

impl NodeHandle {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// One page-table level.
///
/// `entries` is the table the MMU walks and must stay at offset 0 so the
/// node's physical address is the table's physical address. `children`
/// mirrors it with the software handle of each next-level node, since a
/// hardware entry only records a physical address.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct Node<const N: usize> {
    pub entries: [PageEntryBits; N],
    pub children: [Option<NodeHandle>; N],
}

impl<const N: usize> Node<N> {
    pub const EMPTY: Self = Self {
        entries: [PageEntryBits::new(); N],
        children: [None; N],
    };

    fn clear(&mut self) {
        self.entries.fill(PageEntryBits::new());
        self.children.fill(None);
    }
}

const POOL_WORDS: usize = words_for(NODE_POOL_CAPACITY);

/// Fixed pool of page-table nodes, independent of the kernel heap.
///
/// The heap lives in virtual memory, and mapping virtual memory needs
/// page-table nodes, so nodes come from a flat array set aside at boot.
/// Node `i` sits at physical address `phys_base + i * size_of::<Node<N>>()`.
///
/// Every free bumps the node's generation, so a holder of an old handle can
/// tell that the node has been handed out again since.
pub struct NodePool<'a, const N: usize> {
    nodes: &'a mut [Node<N>],
    used: Bitmap<[u64; POOL_WORDS]>,
    generations: [u32; NODE_POOL_CAPACITY],
    in_use: usize,
    phys_base: PhysicalAddress,
}

impl<'a, const N: usize> NodePool<'a, N> {
    /// Takes ownership of `nodes`, whose first byte is at physical `phys_base`.
    ///
    /// # Errors
    /// [`VmemError::PoolTooLarge`] if `nodes` exceeds [`NODE_POOL_CAPACITY`];
    /// [`VmemError::UnalignedPhysical`] if `phys_base` is not page aligned.
    pub fn new(nodes: &'a mut [Node<N>], phys_base: PhysicalAddress) -> Result<Self, VmemError> {
        if nodes.len() > NODE_POOL_CAPACITY {
            return Err(VmemError::PoolTooLarge {
                given: nodes.len(),
                capacity: NODE_POOL_CAPACITY,
            });
        }
        if !phys_base.is_page_aligned() {
            return Err(VmemError::UnalignedPhysical(phys_base));
        }
        let used = Bitmap::new([0; POOL_WORDS], nodes.len()).ok_or(VmemError::PoolTooLarge {
            given: nodes.len(),
            capacity: NODE_POOL_CAPACITY,
        })?;
        Ok(Self {
            nodes,
            used,
            generations: [0; NODE_POOL_CAPACITY],
            in_use: 0,
            phys_base,
        })
    }

    fn is_used(&self, index: usize) -> bool {
        index < self.nodes.len() && self.used.get(index)
    }

    /// Hands out a cleared node.
    ///
    /// # Errors
    /// [`VmemError::OutOfNodes`] when every node is in use.
    pub fn alloc_node(&mut self) -> Result<NodeHandle, VmemError> {
        let Some(index) = self.used.first_clear_from(0) else {
            return Err(VmemError::OutOfNodes);
        };
        self.used.set(index, true);
        self.in_use += 1;
        self.nodes[index].clear();
        trace!("page-table node {index} allocated");
        #[allow(clippy::cast_possible_truncation)]
        Ok(NodeHandle(index as u32))
    }

    /// Returns a node to the pool.
    ///
    /// # Errors
    /// [`VmemError::CorruptNodePool`] if the node is not currently allocated.
    pub fn free_node(&mut self, node: NodeHandle) -> Result<(), VmemError> {
        let index = node.index();
        if !self.is_used(index) {
            error!("free of unallocated page-table node {index}");
            return Err(VmemError::CorruptNodePool { index });
        }
        self.used.set(index, false);
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.in_use -= 1;
        trace!("page-table node {index} freed");
        Ok(())
    }

    /// Whether `node` is currently allocated.
    #[must_use]
    pub fn contains(&self, node: NodeHandle) -> bool {
        self.is_used(node.index())
    }

    /// Number of times `node` has been freed.
    #[must_use]
    pub fn generation(&self, node: NodeHandle) -> u32 {
        self.generations.get(node.index()).copied().unwrap_or(0)
    }

    /// Physical address the hardware uses to reach `node`.
    #[must_use]
    pub fn phys(&self, node: NodeHandle) -> PhysicalAddress {
        self.phys_base + (node.index() * size_of::<Node<N>>()) as u64
    }

    #[inline]
    #[must_use]
    pub fn node(&self, node: NodeHandle) -> &Node<N> {
        &self.nodes[node.index()]
    }

    #[inline]
    pub fn node_mut(&mut self, node: NodeHandle) -> &mut Node<N> {
        &mut self.nodes[node.index()]
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub const fn in_use(&self) -> usize {
        self.in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodes_are_page_sized_and_aligned() {
        assert_eq!(align_of::<Node<512>>(), 4096);
        assert_eq!(size_of::<Node<512>>() % 4096, 0);
        assert_eq!(size_of::<Node<1024>>() % 4096, 0);
    }

    #[test]
    fn alloc_free_and_reuse() {
        let mut nodes = vec![Node::<512>::EMPTY; 3];
        let mut pool = NodePool::new(&mut nodes, PhysicalAddress::new(0x0100_0000)).unwrap();
        let a = pool.alloc_node().unwrap();
        let b = pool.alloc_node().unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.phys(b).as_u64(), 0x0100_0000 + size_of::<Node<512>>() as u64);

        pool.node_mut(a).children[3] = Some(b);
        pool.free_node(a).unwrap();
        let c = pool.alloc_node().unwrap();
        assert_eq!(c, a);
        assert_eq!(pool.generation(c), 1);
        assert_eq!(pool.generation(b), 0);
        assert!(pool.node(c).children[3].is_none(), "reused node is cleared");
        assert_eq!(pool.in_use(), 2);
    }

    #[test]
    fn exhaustion_and_double_free_are_errors() {
        let mut nodes = vec![Node::<512>::EMPTY; 1];
        let mut pool = NodePool::new(&mut nodes, PhysicalAddress::new(0)).unwrap();
        let a = pool.alloc_node().unwrap();
        assert_eq!(pool.alloc_node(), Err(VmemError::OutOfNodes));
        pool.free_node(a).unwrap();
        assert_eq!(
            pool.free_node(a),
            Err(VmemError::CorruptNodePool { index: 0 })
        );
    }

    #[test]
    fn oversized_pool_is_rejected() {
        let mut nodes = vec![Node::<512>::EMPTY; NODE_POOL_CAPACITY + 1];
        assert!(matches!(
            NodePool::new(&mut nodes, PhysicalAddress::new(0)),
            Err(VmemError::PoolTooLarge { .. })
        ));
    }
}
