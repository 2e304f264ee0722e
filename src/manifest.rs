use serde::Serialize;

pub const MANIFEST_NAME: &str = "META-INF/MANIFEST.MF";

/// The six standard package attributes from a jar manifest's main section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestInfo {
    pub specification_title: Option<String>,
    pub specification_version: Option<String>,
    pub specification_vendor: Option<String>,
    pub implementation_title: Option<String>,
    pub implementation_version: Option<String>,
    pub implementation_vendor: Option<String>,
}

impl ManifestInfo {
    /// Parses the main section of a manifest. Continuation lines (leading
    /// space) are joined onto the previous attribute. Unknown attributes are
    /// ignored.
    pub fn parse(content: &[u8]) -> Self {
        let text = String::from_utf8_lossy(content);
        let mut info = Self::default();
        let mut current: Option<(String, String)> = None;

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(rest) = line.strip_prefix(' ') {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(rest);
                }
                continue;
            }
            if let Some((key, value)) = current.take() {
                info.set(&key, value);
            }
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                current = Some((key.trim().to_string(), value.trim_start().to_string()));
            }
        }
        if let Some((key, value)) = current.take() {
            info.set(&key, value);
        }
        info
    }

    fn set(&mut self, key: &str, value: String) {
        let slot = match key {
            "Specification-Title" => &mut self.specification_title,
            "Specification-Version" => &mut self.specification_version,
            "Specification-Vendor" => &mut self.specification_vendor,
            "Implementation-Title" => &mut self.implementation_title,
            "Implementation-Version" => &mut self.implementation_version,
            "Implementation-Vendor" => &mut self.implementation_vendor,
            _ => return,
        };
        *slot = Some(value);
    }

    /// Attributes in serialization order.
    pub fn fields(&self) -> [&Option<String>; 6] {
        [
            &self.specification_title,
            &self.specification_version,
            &self.specification_vendor,
            &self.implementation_title,
            &self.implementation_version,
            &self.implementation_vendor,
        ]
    }

    pub fn from_fields(fields: [Option<String>; 6]) -> Self {
        let [
            specification_title,
            specification_version,
            specification_vendor,
            implementation_title,
            implementation_version,
            implementation_vendor,
        ] = fields;
        Self {
            specification_title,
            specification_version,
            specification_vendor,
            implementation_title,
            implementation_version,
            implementation_vendor,
        }
    }
}
