//! Aligned, human readable report used by `info`.

const PROPERTY_INDENT: usize = 4;
const SECTION_INDENT: usize = 2;

#[derive(Default)]
pub struct OutputBuilder {
    indent: usize,
    header: Option<String>,
    properties: Vec<(String, String)>,
    children: Vec<String>,
}

impl OutputBuilder {
    pub fn new<H: ToString>(header: H) -> Self {
        Self {
            header: Some(header.to_string()),
            ..Default::default()
        }
    }

    /// Render the header, then the properties in insertion order with their keys right
    /// aligned, then every section.
    pub fn build(self) -> String {
        let OutputBuilder {
            indent,
            header,
            properties,
            children,
        } = self;

        let mut output = String::new();
        let width = properties
            .iter()
            .map(|(key, _)| key.chars().count())
            .max()
            .unwrap_or(0);

        if let Some(header) = header {
            output.push_str(&format!("{:indent$}● {header}\n", ""));
        }

        for (key, value) in &properties {
            output.push_str(&format!(
                "{:indent$}{key:>width$}: {value}\n",
                "",
                indent = indent + PROPERTY_INDENT
            ));
        }

        for child in children {
            output.push_str(&child);
        }

        output
    }

    pub fn property<K: ToString, V: ToString>(&mut self, key: K, value: V) {
        self.properties.push((key.to_string(), value.to_string()));
    }

    pub fn section<H: Into<String>>(
        &mut self,
        header: H,
        builder: impl FnOnce(&mut OutputBuilder),
    ) {
        let mut section_builder = OutputBuilder {
            indent: self.indent + SECTION_INDENT,
            header: Some(header.into()),
            ..Default::default()
        };

        (builder)(&mut section_builder);

        self.children.push(section_builder.build());
    }
}
