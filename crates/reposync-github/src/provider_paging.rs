use reqwest::header::HeaderMap;

/// URL of the `rel="next"` entry of a `Link` header.
pub(crate) fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get("link")?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut sections = part.split(';');
        let target = sections.next()?.trim();
        let is_next = sections.any(|param| {
            let param = param.trim();
            param == "rel=\"next\"" || param == "rel=next"
        });
        if !is_next {
            return None;
        }
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        (!url.is_empty()).then(|| url.to_string())
    })
}
