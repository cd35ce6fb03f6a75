//! Fixed domain vocabulary for dashboard layer documents.

pub const BACKGROUND_MAP_KIND: &str = "BackgroundMapDescription";

pub const CANONICAL_KINDS: &[&str] = &[
    BACKGROUND_MAP_KIND,
    "RasterLayerDescription",
    "ContourLayerDescription",
    "WindLayerDescription",
    "StreamlineLayerDescription",
    "TextLayerDescription",
    "PointLayerDescription",
];

/// Kind names models commonly emit, mapped to their canonical spelling.
pub const KIND_ALIASES: &[(&str, &str)] = &[
    ("IsolineLayerDescription", "ContourLayerDescription"),
    ("IsolinesLayerDescription", "ContourLayerDescription"),
    ("ContourDescription", "ContourLayerDescription"),
    ("ContoursLayerDescription", "ContourLayerDescription"),
    ("BackgroundMapLayerDescription", "BackgroundMapDescription"),
    ("BackgroundLayerDescription", "BackgroundMapDescription"),
    ("BaseMapDescription", "BackgroundMapDescription"),
    ("RasterDescription", "RasterLayerDescription"),
    ("HeatmapLayerDescription", "RasterLayerDescription"),
    ("WindArrowLayerDescription", "WindLayerDescription"),
    ("WindBarbLayerDescription", "WindLayerDescription"),
    ("VectorLayerDescription", "WindLayerDescription"),
    ("StreamlinesLayerDescription", "StreamlineLayerDescription"),
    ("LabelLayerDescription", "TextLayerDescription"),
    ("TextDescription", "TextLayerDescription"),
    ("MarkerLayerDescription", "PointLayerDescription"),
];

pub const VALID_MODELS: &[&str] = &[
    "ecmwf_ifs025",
    "ecmwf_aifs025",
    "icon_global",
    "icon_eu",
    "icon_d2",
    "gfs_global",
    "gfs_hrrr",
    "meteofrance_arpege",
    "meteofrance_arome",
    "ukmo_global",
    "jma_gsm",
    "gem_global",
];
pub const DEFAULT_MODEL: &str = "ecmwf_ifs025";

pub const VALID_COLOR_MAPS: &[&str] = &[
    "viridis",
    "plasma",
    "inferno",
    "magma",
    "cividis",
    "turbo",
    "temperature",
    "precipitation",
    "wind_speed",
    "pressure",
    "cloud_cover",
    "grayscale",
];
pub const DEFAULT_COLOR_MAP: &str = "viridis";

pub const VALID_BACKGROUND_STYLES: &[&str] =
    &["light", "dark", "satellite", "terrain", "streets", "outline"];
pub const DEFAULT_BACKGROUND_STYLE: &str = "light";

/// Nested object some generators put styling into instead of the layer itself.
pub const OPTIONS_KEY: &str = "options";

/// Per kind: `(key inside options, key on the layer)`.
pub const RELOCATIONS: &[(&str, &[(&str, &str)])] = &[
    (
        "ContourLayerDescription",
        &[
            ("line_width", "line_width"),
            ("line_color", "line_color"),
            ("text_size", "text_size"),
            ("text_color", "text_color"),
            ("median_filter", "filter_median"),
            ("gaussian_filter", "filter_gauss"),
            ("range", "value_range"),
        ],
    ),
    (
        "RasterLayerDescription",
        &[
            ("median_filter", "filter_median"),
            ("gaussian_filter", "filter_gauss"),
            ("range", "value_range"),
        ],
    ),
    (
        "StreamlineLayerDescription",
        &[("line_width", "line_width"), ("line_color", "line_color")],
    ),
    (
        "WindLayerDescription",
        &[("line_width", "line_width"), ("line_color", "line_color")],
    ),
    (
        "TextLayerDescription",
        &[("text_size", "text_size"), ("text_color", "text_color")],
    ),
];

pub fn is_canonical_kind(kind: &str) -> bool {
    CANONICAL_KINDS.contains(&kind)
}

pub fn alias_target(kind: &str) -> Option<&'static str> {
    KIND_ALIASES
        .iter()
        .find(|(alias, _)| *alias == kind)
        .map(|(_, canonical)| *canonical)
}

pub fn relocations_for(kind: &str) -> &'static [(&'static str, &'static str)] {
    RELOCATIONS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, keys)| *keys)
        .unwrap_or(&[])
}

/// Nearest canonical kind by edit distance, for warnings about unknown kinds.
pub fn suggest_kind(kind: &str) -> Option<&'static str> {
    CANONICAL_KINDS
        .iter()
        .map(|c| (*c, strsim::normalized_levenshtein(kind, c)))
        .filter(|(_, sim)| *sim >= 0.7)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_point_at_canonical_kinds() {
        for (alias, target) in KIND_ALIASES {
            assert!(is_canonical_kind(target), "{} -> {}", alias, target);
            assert!(!is_canonical_kind(alias));
        }
    }

    #[test]
    fn test_defaults_are_whitelisted() {
        assert!(VALID_MODELS.contains(&DEFAULT_MODEL));
        assert!(VALID_COLOR_MAPS.contains(&DEFAULT_COLOR_MAP));
        assert!(VALID_BACKGROUND_STYLES.contains(&DEFAULT_BACKGROUND_STYLE));
    }

    #[test]
    fn test_suggest_kind() {
        assert_eq!(
            suggest_kind("RasterLayerDescriptio"),
            Some("RasterLayerDescription")
        );
        assert_eq!(suggest_kind("Pie"), None);
    }
}
