use super::node::TreeNode;

#[derive(Debug)]
struct Slot {
    node: TreeNode,
    children: Vec<usize>,
}

/// Index-addressed tree under construction.
///
/// A slot is only ever attached to one parent, and parents always precede
/// their children, which is what lets [`TreeArena::into_forest`] fold the
/// slots back into owned nodes in a single reverse sweep.
#[derive(Debug, Default)]
pub(crate) struct TreeArena {
    slots: Vec<Slot>,
    roots: Vec<usize>,
}

impl TreeArena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends `node` as the last child of `parent`, or as a new root.
    pub(crate) fn push(&mut self, node: TreeNode, parent: Option<usize>) -> usize {
        let index = self.slots.len();
        self.slots.push(Slot {
            node,
            children: Vec::new(),
        });
        match parent.and_then(|parent| self.slots.get_mut(parent).filter(|_| parent < index)) {
            Some(parent) => parent.children.push(index),
            None => self.roots.push(index),
        }
        index
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn into_forest(self) -> Vec<TreeNode> {
        let mut built: Vec<Option<TreeNode>> = Vec::with_capacity(self.slots.len());
        built.resize_with(self.slots.len(), || None);
        for (index, slot) in self.slots.into_iter().enumerate().rev() {
            let mut node = slot.node;
            node.sub_folders = slot
                .children
                .iter()
                .filter_map(|child| built[*child].take())
                .collect();
            built[index] = Some(node);
        }
        self.roots
            .iter()
            .filter_map(|root| built[*root].take())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_slots_into_nested_nodes() {
        let mut arena = TreeArena::new();
        let root = arena.push(TreeNode::new("root"), None);
        let a = arena.push(TreeNode::new("a"), Some(root));
        arena.push(TreeNode::new("b"), Some(root));
        arena.push(TreeNode::new("a1"), Some(a));
        arena.push(TreeNode::new("other"), None);

        assert_eq!(arena.len(), 5);
        let forest = arena.into_forest();
        assert_eq!(forest.len(), 2);
        let names: Vec<_> = forest[0].sub_folders.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(forest[0].sub_folders[0].sub_folders[0].name, "a1");
        assert_eq!(forest[1].name, "other");
    }

    #[test]
    fn unknown_parent_becomes_root() {
        let mut arena = TreeArena::new();
        arena.push(TreeNode::new("lonely"), Some(7));
        let forest = arena.into_forest();
        assert_eq!(forest[0].name, "lonely");
    }
}
