use std::collections::HashMap;

use crate::selector::{chain_matches, parse_selector_groups};
use crate::{Error, Result, truncate_chars};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) enum NodeType {
    Document,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) node_type: NodeType,
}

#[derive(Debug, Clone)]
pub(crate) struct Element {
    pub(crate) tag_name: String,
    pub(crate) attrs: HashMap<String, String>,
    pub(crate) value: String,
    pub(crate) checked: bool,
    pub(crate) disabled: bool,
    pub(crate) readonly: bool,
    pub(crate) selected_files: Vec<String>,
}

/// Arena-backed document. Node ids stay valid for the lifetime of the
/// document; removed subtrees remain in the arena but are observably
/// disconnected, which is what stale-handle revalidation checks for.
#[derive(Debug, Clone)]
pub(crate) struct Dom {
    pub(crate) nodes: Vec<Node>,
    pub(crate) root: NodeId,
    id_index: HashMap<String, NodeId>,
}

impl Dom {
    pub(crate) fn new() -> Self {
        let root = Node {
            parent: None,
            children: Vec::new(),
            node_type: NodeType::Document,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            id_index: HashMap::new(),
        }
    }

    pub(crate) fn create_node(&mut self, parent: Option<NodeId>, node_type: NodeType) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            node_type,
        });
        if let Some(parent_id) = parent {
            self.nodes[parent_id.0].children.push(id);
        }
        id
    }

    pub(crate) fn create_element(
        &mut self,
        parent: NodeId,
        tag_name: String,
        attrs: HashMap<String, String>,
    ) -> NodeId {
        let value = attrs.get("value").cloned().unwrap_or_default();
        let checked = attrs.contains_key("checked");
        let disabled = attrs.contains_key("disabled");
        let readonly = attrs.contains_key("readonly");
        let element = Element {
            tag_name,
            attrs,
            value,
            checked,
            disabled,
            readonly,
            selected_files: Vec::new(),
        };
        let id = self.create_node(Some(parent), NodeType::Element(element));
        if let Some(id_attr) = self
            .element(id)
            .and_then(|element| element.attrs.get("id").cloned())
        {
            self.id_index.insert(id_attr, id);
        }
        id
    }

    pub(crate) fn create_text(&mut self, parent: NodeId, text: String) -> NodeId {
        self.create_node(Some(parent), NodeType::Text(text))
    }

    pub(crate) fn element(&self, node_id: NodeId) -> Option<&Element> {
        match &self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn element_mut(&mut self, node_id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node_id.0].node_type {
            NodeType::Element(element) => Some(element),
            _ => None,
        }
    }

    pub(crate) fn tag_name(&self, node_id: NodeId) -> Option<&str> {
        self.element(node_id).map(|e| e.tag_name.as_str())
    }

    pub(crate) fn parent(&self, node_id: NodeId) -> Option<NodeId> {
        self.nodes[node_id.0].parent
    }

    pub(crate) fn by_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    pub(crate) fn is_connected(&self, node_id: NodeId) -> bool {
        if node_id == self.root {
            return true;
        }
        let mut cursor = self.parent(node_id);
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub(crate) fn text_content(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document | NodeType::Element(_) => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.text_content(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
        }
    }

    pub(crate) fn set_text_content(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::InvalidCommand(
                "text content target is not an element".into(),
            ));
        }
        let old_children = std::mem::take(&mut self.nodes[node_id.0].children);
        for child in old_children {
            self.nodes[child.0].parent = None;
        }
        if !value.is_empty() {
            self.create_text(node_id, value.to_string());
        }
        Ok(())
    }

    pub(crate) fn remove_node(&mut self, node_id: NodeId) -> Result<()> {
        if self.element(node_id).is_none() {
            return Err(Error::InvalidCommand("remove target is not an element".into()));
        }
        if let Some(parent) = self.nodes[node_id.0].parent {
            self.nodes[parent.0].children.retain(|child| *child != node_id);
        }
        self.nodes[node_id.0].parent = None;
        self.rebuild_id_index();
        Ok(())
    }

    pub(crate) fn rebuild_id_index(&mut self) {
        self.id_index.clear();
        let connected = self.all_element_nodes();
        for node in connected {
            if let Some(id_attr) = self.attr(node, "id") {
                self.id_index.insert(id_attr, node);
            }
        }
    }

    /// Connected element nodes in document order.
    pub(crate) fn all_element_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_elements(self.root, &mut out);
        out
    }

    fn collect_elements(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node_id.0].children {
            if self.element(*child).is_some() {
                out.push(*child);
            }
            self.collect_elements(*child, out);
        }
    }

    pub(crate) fn attr(&self, node_id: NodeId, name: &str) -> Option<String> {
        self.element(node_id)
            .and_then(|e| e.attrs.get(name).cloned())
    }

    pub(crate) fn set_attr(&mut self, node_id: NodeId, name: &str, value: &str) -> Result<()> {
        let is_id = name.eq_ignore_ascii_case("id");
        {
            let element = self
                .element_mut(node_id)
                .ok_or_else(|| Error::InvalidCommand("attribute target is not an element".into()))?;
            let lowered = name.to_ascii_lowercase();
            element.attrs.insert(lowered.clone(), value.to_string());
            match lowered.as_str() {
                "value" => element.value = value.to_string(),
                "checked" => element.checked = true,
                "disabled" => element.disabled = true,
                "readonly" => element.readonly = true,
                _ => {}
            }
        }
        if is_id {
            self.rebuild_id_index();
        }
        Ok(())
    }

    pub(crate) fn remove_attr(&mut self, node_id: NodeId, name: &str) -> Result<()> {
        let is_id = name.eq_ignore_ascii_case("id");
        {
            let element = self
                .element_mut(node_id)
                .ok_or_else(|| Error::InvalidCommand("attribute target is not an element".into()))?;
            let lowered = name.to_ascii_lowercase();
            element.attrs.remove(&lowered);
            match lowered.as_str() {
                "checked" => element.checked = false,
                "disabled" => element.disabled = false,
                "readonly" => element.readonly = false,
                _ => {}
            }
        }
        if is_id {
            self.rebuild_id_index();
        }
        Ok(())
    }

    pub(crate) fn value(&self, node_id: NodeId) -> Result<String> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::InvalidCommand("value target is not an element".into()))?;
        Ok(element.value.clone())
    }

    pub(crate) fn set_value(&mut self, node_id: NodeId, value: &str) -> Result<()> {
        if self
            .tag_name(node_id)
            .map(|tag| tag.eq_ignore_ascii_case("select"))
            .unwrap_or(false)
        {
            return self.set_select_values(node_id, &[value.to_string()]);
        }
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::InvalidCommand("value target is not an element".into()))?;
        element.value = value.to_string();
        Ok(())
    }

    pub(crate) fn checked(&self, node_id: NodeId) -> Result<bool> {
        let element = self
            .element(node_id)
            .ok_or_else(|| Error::InvalidCommand("checked target is not an element".into()))?;
        Ok(element.checked)
    }

    pub(crate) fn set_checked(&mut self, node_id: NodeId, checked: bool) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::InvalidCommand("checked target is not an element".into()))?;
        element.checked = checked;
        Ok(())
    }

    pub(crate) fn disabled(&self, node_id: NodeId) -> bool {
        self.element(node_id).map(|e| e.disabled).unwrap_or(false)
    }

    pub(crate) fn readonly(&self, node_id: NodeId) -> bool {
        self.element(node_id).map(|e| e.readonly).unwrap_or(false)
    }

    pub(crate) fn selected_files(&self, node_id: NodeId) -> Vec<String> {
        self.element(node_id)
            .map(|e| e.selected_files.clone())
            .unwrap_or_default()
    }

    pub(crate) fn set_selected_files(&mut self, node_id: NodeId, files: &[String]) -> Result<()> {
        let element = self
            .element_mut(node_id)
            .ok_or_else(|| Error::InvalidCommand("file target is not an element".into()))?;
        element.selected_files = files.to_vec();
        element.value = files.first().cloned().unwrap_or_default();
        Ok(())
    }

    pub(crate) fn collect_select_options(&self, node_id: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node_id.0].children {
            if self
                .tag_name(*child)
                .map(|tag| tag.eq_ignore_ascii_case("option"))
                .unwrap_or(false)
            {
                out.push(*child);
            }
            self.collect_select_options(*child, out);
        }
    }

    pub(crate) fn option_effective_value(&self, option_node: NodeId) -> Result<String> {
        let element = self
            .element(option_node)
            .ok_or_else(|| Error::InvalidCommand("option target is not an element".into()))?;
        if !element.tag_name.eq_ignore_ascii_case("option") {
            return Err(Error::InvalidCommand("option target is not an option".into()));
        }
        if let Some(value) = element.attrs.get("value") {
            return Ok(value.clone());
        }
        Ok(self.text_content(option_node))
    }

    /// Selects every option whose effective value appears in `requested`;
    /// deselects the rest. The select's own value mirrors the first
    /// selected option, matching single-select reads.
    pub(crate) fn set_select_values(&mut self, select_node: NodeId, requested: &[String]) -> Result<()> {
        let tag = self
            .tag_name(select_node)
            .ok_or_else(|| Error::InvalidCommand("select target is not an element".into()))?;
        if !tag.eq_ignore_ascii_case("select") {
            return Err(Error::InvalidCommand("set value target is not a select".into()));
        }

        let mut options = Vec::new();
        self.collect_select_options(select_node, &mut options);

        let mut first_selected: Option<String> = None;
        for option in options {
            let value = self.option_effective_value(option)?;
            let selected = requested.contains(&value);
            if selected && first_selected.is_none() {
                first_selected = Some(value.clone());
            }
            let element = self
                .element_mut(option)
                .ok_or_else(|| Error::InvalidCommand("option target is not an element".into()))?;
            if selected {
                element.attrs.insert("selected".into(), "true".into());
            } else {
                element.attrs.remove("selected");
            }
        }

        let element = self
            .element_mut(select_node)
            .ok_or_else(|| Error::InvalidCommand("select target is not an element".into()))?;
        element.value = first_selected.unwrap_or_default();
        Ok(())
    }

    pub(crate) fn selected_option_values(&self, select_node: NodeId) -> Result<Vec<String>> {
        let mut options = Vec::new();
        self.collect_select_options(select_node, &mut options);
        let mut out = Vec::new();
        for option in options {
            if self.attr(option, "selected").is_some() {
                out.push(self.option_effective_value(option)?);
            }
        }
        Ok(out)
    }

    fn select_value_from_options(&self, select_node: NodeId) -> Result<String> {
        let mut options = Vec::new();
        self.collect_select_options(select_node, &mut options);
        if options.is_empty() {
            return Ok(String::new());
        }
        let selected = options
            .iter()
            .copied()
            .find(|option| self.attr(*option, "selected").is_some())
            .unwrap_or(options[0]);
        self.option_effective_value(selected)
    }

    /// Textareas take their initial value from their text; selects from
    /// their options. Runs once after parsing.
    pub(crate) fn initialize_form_control_values(&mut self) -> Result<()> {
        let nodes = self.all_element_nodes();
        for node in nodes {
            let tag = self
                .tag_name(node)
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            if tag == "textarea" {
                let text = self.text_content(node);
                if let Some(element) = self.element_mut(node) {
                    element.value = text;
                }
            } else if tag == "select" {
                let value = self.select_value_from_options(node)?;
                if let Some(element) = self.element_mut(node) {
                    element.value = value;
                }
            }
        }
        Ok(())
    }

    /// Visibility without layout: connected, no `hidden` attribute, and no
    /// inline `display: none` on the node or any ancestor.
    pub(crate) fn visible(&self, node_id: NodeId) -> bool {
        if !self.is_connected(node_id) {
            return false;
        }
        let mut cursor = Some(node_id);
        while let Some(current) = cursor {
            if self.element(current).is_some() {
                if self.attr(current, "hidden").is_some() {
                    return false;
                }
                if let Some(style) = self.attr(current, "style") {
                    let compact: String =
                        style.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                    if compact.contains("display:none") {
                        return false;
                    }
                }
            }
            cursor = self.parent(current);
        }
        true
    }

    pub(crate) fn query_selector(&self, selector: &str) -> Result<Option<NodeId>> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    pub(crate) fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let groups = parse_selector_groups(selector)?;

        // Fast path: a lone #id group hits the id index directly.
        if groups.len() == 1 && groups[0].len() == 1 {
            if let Some(id) = groups[0][0].step.id_only() {
                return Ok(self
                    .by_id(id)
                    .filter(|node| self.is_connected(*node))
                    .into_iter()
                    .collect());
            }
        }

        let mut out = Vec::new();
        for node in self.all_element_nodes() {
            if groups.iter().any(|chain| chain_matches(self, node, chain)) {
                out.push(node);
            }
        }
        Ok(out)
    }

    pub(crate) fn append_fragment(&mut self, target: NodeId, fragment: &Dom) -> Result<()> {
        if self.element(target).is_none() {
            return Err(Error::InvalidCommand("append target is not an element".into()));
        }
        let children = fragment.nodes[fragment.root.0].children.clone();
        for child in children {
            self.clone_subtree_from_dom(fragment, child, Some(target))?;
        }
        self.rebuild_id_index();
        Ok(())
    }

    fn clone_subtree_from_dom(
        &mut self,
        source: &Dom,
        source_node: NodeId,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        let node_type = match &source.nodes[source_node.0].node_type {
            NodeType::Document => {
                return Err(Error::InvalidCommand(
                    "cannot clone a document node into an element".into(),
                ));
            }
            NodeType::Element(element) => NodeType::Element(element.clone()),
            NodeType::Text(text) => NodeType::Text(text.clone()),
        };
        let node = self.create_node(parent, node_type);
        for child in &source.nodes[source_node.0].children {
            self.clone_subtree_from_dom(source, *child, Some(node))?;
        }
        Ok(node)
    }

    pub(crate) fn dump_node(&self, node_id: NodeId) -> String {
        match &self.nodes[node_id.0].node_type {
            NodeType::Document => {
                let mut out = String::new();
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out
            }
            NodeType::Text(text) => text.clone(),
            NodeType::Element(element) => {
                let mut out = String::new();
                out.push('<');
                out.push_str(&element.tag_name);
                let mut keys: Vec<&String> = element.attrs.keys().collect();
                keys.sort();
                for key in keys {
                    out.push_str(&format!(" {}=\"{}\"", key, element.attrs[key]));
                }
                out.push('>');
                for child in &self.nodes[node_id.0].children {
                    out.push_str(&self.dump_node(*child));
                }
                out.push_str(&format!("</{}>", element.tag_name));
                out
            }
        }
    }

    pub(crate) fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dump_node(node_id), 200)
    }
}
