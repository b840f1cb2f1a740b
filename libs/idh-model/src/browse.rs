//! Browse items

use crate::tag::DataType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeType {
    #[default]
    Unknown = 0,
    Object = 1,
    Variable = 2,
    Method = 3,
    ObjectType = 4,
    VariableType = 5,
    DataType = 6,
    ReferenceType = 7,
    View = 8,
}

impl NodeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Unknown,
            1 => Self::Object,
            2 => Self::Variable,
            3 => Self::Method,
            4 => Self::ObjectType,
            5 => Self::VariableType,
            6 => Self::DataType,
            7 => Self::ReferenceType,
            8 => Self::View,
            _ => return None,
        })
    }
}

/// One node of a backend's address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseItem {
    pub namespace_index: u16,
    pub node_name: String,
    pub display_name: String,
    pub description: String,
    pub node_type: NodeType,
    /// Only meaningful for variables
    pub data_type: DataType,
    pub readable: bool,
    pub writable: bool,
    pub has_children: bool,
}

impl BrowseItem {
    /// Folder-like node
    pub fn object(namespace_index: u16, node_name: impl Into<String>) -> Self {
        let node_name = node_name.into();
        Self {
            namespace_index,
            display_name: node_name.clone(),
            node_name,
            description: String::new(),
            node_type: NodeType::Object,
            data_type: DataType::Unknown,
            readable: false,
            writable: false,
            has_children: true,
        }
    }

    /// Readable and writable leaf variable
    pub fn variable(namespace_index: u16, node_name: impl Into<String>, data_type: DataType) -> Self {
        let node_name = node_name.into();
        Self {
            namespace_index,
            display_name: node_name.clone(),
            node_name,
            description: String::new(),
            node_type: NodeType::Variable,
            data_type,
            readable: true,
            writable: true,
            has_children: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_values() {
        assert_eq!(NodeType::from_u8(2), Some(NodeType::Variable));
        assert_eq!(NodeType::View as u8, 8);
        assert_eq!(NodeType::from_u8(9), None);
    }

    #[test]
    fn test_constructors() {
        let folder = BrowseItem::object(2, "Plant");
        assert!(folder.has_children);
        assert!(!folder.readable);

        let var = BrowseItem::variable(2, "MV1", DataType::Real).with_description("flow");
        assert_eq!(var.display_name, "MV1");
        assert_eq!(var.description, "flow");
        assert!(var.readable && var.writable);
    }
}
