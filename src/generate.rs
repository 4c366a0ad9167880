//! Static HTML page generation.
//!
//! Pages are produced by token substitution into HTML templates. The
//! templates ship with the crate as `assets/templates.json`, a string map in
//! the manifest micro-codec where each value is a `"""`-quoted chunk.
//!
//! ## Generated Pages
//!
//! | Page | Template | Content |
//! |---|---|---|
//! | `index.html` | `redirectPageHTML` or `checkJSPageHTML` | forwards to the JS album, or to the no-script pages without JavaScript |
//! | `index_offline.html` | same | like `index.html`, pointing at the offline page |
//! | `PhotoAlbum_fatxs.html` | the deployed start page | manifests inlined as `<script type="application/json">` blocks |
//! | `noscript_gallery.html` | `galleryHTML` + cells | thumbnail table, four per row |
//! | `noscript_image<N>.html` | `imagePageHTML` + `panelHTML` + `imageHTML` | one photo with back/next links |
//!
//! ## Tokens
//!
//! A token is `$` followed by capital letters (`$TITLE`, `$GALLERYROWS`).
//! Substitution is a single left-to-right pass: inserted text is never
//! scanned again, and tokens without a value stay as they are. Texts
//! from the album (titles, captions) are HTML-escaped on the way in.

use crate::json;
use crate::manifest::Manifests;
use std::collections::BTreeMap;
use thiserror::Error;

/// The JavaScript entry page, deployed with the runtime bundle.
pub const START_PAGE: &str = "PhotoAlbum_xs.html";
/// The offline variant of [`START_PAGE`] with inlined manifests.
pub const FAT_PAGE: &str = "PhotoAlbum_fatxs.html";
pub const NOSCRIPT_GALLERY: &str = "noscript_gallery.html";

const TEMPLATES_JSON: &str = include_str!("../assets/templates.json");

const REQUIRED: [&str; 11] = [
    "doctypeHTML5",
    "doctypeXHTML11",
    "checkJSPageHTML",
    "redirectPageHTML",
    "galleryHTML",
    "galleryCellHTML",
    "galleryEmptyCellHTML",
    "imagePageHTML",
    "panelHTML",
    "galleryButtonHTML",
    "imageHTML",
];

/// Cells per row of the no-script gallery.
const GALLERY_COLUMNS: usize = 4;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template collection is malformed")]
    Malformed,
    #[error("template missing: {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Doctype {
    #[default]
    Html5,
    Xhtml11,
}

/// File name of the no-script page of image `number` (1-based).
pub fn image_page_name(number: usize) -> String {
    format!("noscript_image{number}.html")
}

/// Minimal HTML text escaping.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace `$TOKEN`s in `template` in a single pass.
pub fn substitute(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(at) = rest.find('$') {
        out.push_str(&rest[..at]);
        let after = &rest[at + 1..];
        let len = after
            .bytes()
            .take_while(|b| b.is_ascii_uppercase())
            .count();
        let token = &after[..len];
        match values.iter().find(|(name, _)| *name == token) {
            Some((_, value)) if len > 0 => out.push_str(value),
            _ => {
                out.push('$');
                out.push_str(token);
            }
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}

/// Template set used to render all static pages.
#[derive(Debug, Clone)]
pub struct Templates {
    chunks: BTreeMap<String, String>,
    doctype: Doctype,
}

impl Templates {
    /// The templates compiled into the crate.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::parse(TEMPLATES_JSON)
    }

    /// Parse a template collection; every required template must be present.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let chunks = json::parse_string_map(text).ok_or(TemplateError::Malformed)?;
        if let Some(missing) = REQUIRED.iter().find(|name| !chunks.contains_key(**name)) {
            return Err(TemplateError::Missing(missing.to_string()));
        }
        Ok(Self {
            chunks,
            doctype: Doctype::default(),
        })
    }

    pub fn set_doctype(&mut self, doctype: Doctype) {
        self.doctype = doctype;
    }

    pub fn doctype(&self) -> Doctype {
        self.doctype
    }

    fn chunk(&self, name: &str) -> &str {
        self.chunks.get(name).map(String::as_str).unwrap_or_default()
    }

    fn doctype_text(&self) -> &str {
        match self.doctype {
            Doctype::Html5 => self.chunk("doctypeHTML5"),
            Doctype::Xhtml11 => self.chunk("doctypeXHTML11"),
        }
    }

    /// `index.html`: redirect to the JS album, falling back to the
    /// no-script gallery (or first image) when those pages exist.
    pub fn index_page(&self, noscript: bool, gallery: bool) -> String {
        self.entry_page(START_PAGE, noscript, gallery)
    }

    /// `index_offline.html`: like [`Self::index_page`] for the offline page.
    pub fn offline_index(&self, noscript: bool, gallery: bool) -> String {
        self.entry_page(FAT_PAGE, noscript, gallery)
    }

    fn entry_page(&self, album: &str, noscript: bool, gallery: bool) -> String {
        let doctype = self.doctype_text();
        if noscript {
            let entry = if gallery { "gallery" } else { "image1" };
            substitute(
                self.chunk("redirectPageHTML"),
                &[("DOCTYPE", doctype), ("ALBUM", album), ("ENTRY", entry)],
            )
        } else {
            substitute(
                self.chunk("checkJSPageHTML"),
                &[("DOCTYPE", doctype), ("ALBUM", album)],
            )
        }
    }

    /// `noscript_gallery.html` with one cell per file in `thumb_dir`
    /// (e.g. `160x160`), linking to the matching image page.
    pub fn gallery_page(
        &self,
        title: &str,
        subtitle: &str,
        bottom_line: &str,
        thumb_dir: &str,
        file_names: &[&str],
    ) -> String {
        let cells: Vec<String> = file_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let img = escape_html(&format!("slides/{thumb_dir}/{name}"));
                let link = image_page_name(i + 1);
                substitute(self.chunk("galleryCellHTML"), &[("IMG", &img), ("LINK", &link)])
            })
            .collect();

        let mut rows = String::new();
        for row in cells.chunks(GALLERY_COLUMNS) {
            rows.push_str("<tr>\n");
            for cell in row {
                rows.push_str(cell);
            }
            for _ in row.len()..GALLERY_COLUMNS {
                rows.push_str(self.chunk("galleryEmptyCellHTML"));
            }
            rows.push_str("</tr>\n");
        }

        substitute(
            self.chunk("galleryHTML"),
            &[
                ("DOCTYPE", self.doctype_text()),
                ("TITLE", &escape_html(title)),
                ("SUBTITLE", &escape_html(subtitle)),
                ("BOTTOMLINE", &escape_html(bottom_line)),
                ("GALLERYROWS", &rows),
                ("ALBUM", START_PAGE),
            ],
        )
    }

    /// `noscript_image<number>.html` showing `file_name` from `size_dir`.
    ///
    /// The first page has no back link and the `last` page no next link.
    /// With `gallery`, the panel also links back to the gallery.
    pub fn image_page(
        &self,
        number: usize,
        size_dir: &str,
        file_name: &str,
        caption: &str,
        last: bool,
        gallery: bool,
    ) -> String {
        let back = if number > 1 {
            image_page_name(number - 1)
        } else {
            String::new()
        };
        let next = if last {
            String::new()
        } else {
            image_page_name(number + 1)
        };
        let gallery_button = if gallery {
            self.chunk("galleryButtonHTML")
        } else {
            ""
        };
        let panel = substitute(
            self.chunk("panelHTML"),
            &[
                ("BACKLINK", &back),
                ("NEXTLINK", &next),
                ("GALLERYBUTTON", gallery_button),
            ],
        );
        let size = format!("slides/{size_dir}");
        let image = substitute(
            self.chunk("imageHTML"),
            &[("SIZE", &size), ("IMG", &escape_html(file_name))],
        );
        let number_text = number.to_string();
        substitute(
            self.chunk("imagePageHTML"),
            &[
                ("DOCTYPE", self.doctype_text()),
                ("TITLE", &format!("Image {number}")),
                ("SLIDENR", &number_text),
                ("PANEL", &panel),
                ("IMAGE", &image),
                ("CAPTION", &escape_html(caption)),
                ("ALBUM", START_PAGE),
            ],
        )
    }
}

/// `<script>` block carrying one manifest inside an HTML page.
///
/// `</` and `<!--` inside the manifest are written as `<\/` and `\u003c!--`,
/// which read back as the same JSON but cannot end the element early.
pub fn json_block(name: &str, content: &str) -> String {
    let mut block = format!("<script id=\"{name}\" style=\"display:none;\" type=\"application/json\">\n");
    block.push_str(&content.replace("</", "<\\/").replace("<!--", "\\u003c!--"));
    if !content.ends_with('\n') {
        block.push('\n');
    }
    block.push_str("</script>\n");
    block
}

/// The offline page: `start_page` with `manifests` inlined before `</head>`.
///
/// Inline blocks and `<meta name="info">` lines left from an earlier run
/// are removed first, so feeding an offline page back in yields the same
/// page with the new manifests.
pub fn fat_page(start_page: &str, manifests: &Manifests) -> String {
    let mut out = String::with_capacity(start_page.len() + 4096);
    let mut in_old_block = false;
    for line in start_page.lines() {
        if in_old_block {
            in_old_block = !line.contains("</script>");
        } else if line.contains("<script") && line.contains("display:none") {
            in_old_block = !line.contains("</script>");
        } else if line.contains("<meta name=\"info\"") {
            // dropped; re-added below
        } else if line.contains("</head>") {
            for (name, content) in manifests.entries() {
                out.push_str(&json_block(name, content));
            }
            out.push_str("<meta name=\"info\" content=\"info.json\">\n");
            out.push_str(line);
            out.push('\n');
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates() -> Templates {
        Templates::builtin().unwrap()
    }

    fn assert_no_placeholders(page: &str) {
        let bytes = page.as_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if *b == b'$' {
                let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                assert!(!next.is_ascii_uppercase(), "unresolved token at {i}: {page}");
            }
        }
    }

    // =========================================================================
    // Substitution
    // =========================================================================

    #[test]
    fn substitute_replaces_longest_token() {
        let out = substitute("$IMAGE / $IMG", &[("IMG", "a.jpg"), ("IMAGE", "<img>")]);
        assert_eq!(out, "<img> / a.jpg");
    }

    #[test]
    fn substitute_does_not_rescan_inserted_text() {
        let out = substitute("<p>$CAPTION</p>", &[("CAPTION", "costs $TITLE"), ("TITLE", "x")]);
        assert_eq!(out, "<p>costs $TITLE</p>");
    }

    #[test]
    fn unknown_tokens_and_lone_dollars_survive() {
        assert_eq!(substitute("$ 5 $x $NOPE", &[]), "$ 5 $x $NOPE");
    }

    #[test]
    fn escape_html_special_chars() {
        assert_eq!(escape_html("a<b & \"c\">"), "a&lt;b &amp; &quot;c&quot;&gt;");        assert_eq!(escape_html("it's"), "it&#39;s");
    }

    // =========================================================================
    // Template collection
    // =========================================================================

    #[test]
    fn builtin_templates_are_complete() {
        let t = templates();
        for name in REQUIRED {
            assert!(!t.chunk(name).is_empty(), "{name}");
        }
    }

    #[test]
    fn missing_template_is_reported() {
        let result = Templates::parse(r#"{"doctypeHTML5": "<!DOCTYPE html>"}"#);
        assert!(matches!(result, Err(TemplateError::Missing(name)) if name == "doctypeXHTML11"));
        assert!(matches!(Templates::parse("no map"), Err(TemplateError::Malformed)));
    }

    // =========================================================================
    // Pages
    // =========================================================================

    #[test]
    fn index_page_variants() {
        let t = templates();
        let redirect = t.index_page(true, true);
        assert!(redirect.starts_with("<!DOCTYPE html>"));
        assert!(redirect.contains(START_PAGE));
        assert!(redirect.contains("noscript_gallery.html"));
        assert_no_placeholders(&redirect);

        let first_image = t.index_page(true, false);
        assert!(first_image.contains("noscript_image1.html"));

        let check = t.index_page(false, true);
        assert!(!check.contains("noscript_"));
        assert_no_placeholders(&check);
    }

    #[test]
    fn offline_index_points_at_fat_page() {
        let page = templates().offline_index(true, true);
        assert!(page.contains(FAT_PAGE));
        assert!(!page.contains(START_PAGE));
    }

    #[test]
    fn xhtml_doctype() {
        let mut t = templates();
        t.set_doctype(Doctype::Xhtml11);
        assert!(t.index_page(false, false).starts_with("<?xml"));
    }

    #[test]
    fn gallery_rows_of_four() {
        let names = ["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg"];
        let page = templates().gallery_page("T & C", "sub", "bottom", "160x160", &names);
        assert_eq!(page.matches("<tr>").count(), 2);
        assert_eq!(page.matches("class=\"galleryCell\"").count(), 8);
        assert!(page.contains("slides/160x160/5.jpg"));
        assert!(page.contains("href=\"noscript_image5.html\""));
        assert!(page.contains("T &amp; C"));
        assert_no_placeholders(&page);
    }

    #[test]
    fn file_names_are_escaped_in_attributes() {
        let t = templates();
        let name = "tom & \"jerry's\" <1>.jpg";
        let escaped = "tom &amp; &quot;jerry&#39;s&quot; &lt;1&gt;.jpg";

        let gallery = t.gallery_page("T", "", "", "160x160", &[name]);
        assert!(gallery.contains(&format!("slides/160x160/{escaped}")));
        assert!(!gallery.contains(name));

        let page = t.image_page(1, "640x480", name, "", true, false);
        assert!(page.contains(&format!("slides/640x480/{escaped}")));
        assert!(page.contains(&format!("alt=\"{escaped}\"")));
        assert!(!page.contains(name));
    }

    #[test]
    fn image_page_links() {
        let t = templates();
        let first = t.image_page(1, "640x480", "a.jpg", "<hi>", false, true);
        assert!(first.contains("href=\"\""));
        assert!(first.contains("noscript_image2.html"));
        assert!(first.contains("noscript_gallery.html"));
        assert!(first.contains("slides/640x480/a.jpg"));
        assert!(first.contains("&lt;hi&gt;"));
        assert_no_placeholders(&first);

        let last = t.image_page(3, "640x480", "c.jpg", "", true, false);
        assert!(last.contains("noscript_image2.html"));
        assert!(!last.contains("noscript_image4.html"));
        assert!(!last.contains("noscript_gallery.html"));
        assert!(last.contains("#slide_3"));
        assert_no_placeholders(&last);
    }

    // =========================================================================
    // Offline page
    // =========================================================================

    fn manifests() -> Manifests {
        Manifests {
            info: "{ \"title\": \"x\" }\n".into(),
            directories: "[\n\"160x160\"\n]\n".into(),
            filenames: "[\n\"a.jpg\"\n]\n".into(),
            captions: "{  }\n".into(),
            resolutions: "[{  },\n{  }]\n".into(),
        }
    }

    #[test]
    fn fat_page_inlines_manifests_before_head_end() {
        let start = "<html>\n<head>\n<title>t</title>\n</head>\n<body></body>\n</html>\n";
        let page = fat_page(start, &manifests());
        let head_end = page.find("</head>").unwrap();
        for name in ["info.json", "directories.json", "filenames.json", "resolutions.json", "captions.json"] {
            let at = page.find(&format!("<script id=\"{name}\"")).unwrap();
            assert!(at < head_end);
        }
        assert!(page.contains("<meta name=\"info\" content=\"info.json\">"));
    }

    #[test]
    fn closing_tag_in_caption_stays_inside_its_block() {
        let mut captions = BTreeMap::new();
        captions.insert("a.jpg".to_string(), "a </script> b <!-- c".to_string());
        let mut manifests = manifests();
        manifests.captions = json::write_string_map(&captions);

        let page = fat_page("<head>\n</head>\n", &manifests);
        let open = "<script id=\"captions.json\" style=\"display:none;\" type=\"application/json\">";
        let start = page.find(open).unwrap() + open.len();
        let end = start + page[start..].find("</script>").unwrap();
        let inline = &page[start..end];
        assert!(!inline.contains("<!--"));

        let parsed: BTreeMap<String, String> = serde_json::from_str(inline).unwrap();
        assert_eq!(parsed, captions);
        assert_eq!(json::parse_string_map(inline).unwrap(), captions);

        // Refreshing the page must still find the end of the old block.
        assert_eq!(fat_page(&page, &manifests), page);
    }

    #[test]
    fn fat_page_replaces_previous_blocks() {
        let start = "<head>\n</head>\n";
        let once = fat_page(start, &manifests());
        let twice = fat_page(&once, &manifests());
        assert_eq!(once, twice);
        assert_eq!(twice.matches("<meta name=\"info\"").count(), 1);
    }
}
