//! Content normalization: raw gallery HTML into canonical records.
//!
//! Pure functions, no I/O. Listing pages yield lightweight stubs, view pages
//! yield full [`Post`] records. Comments arrive flat with parent references
//! and are rebuilt into a tree in one indexed pass; a reply whose parent has
//! not appeared earlier in document order (including any would-be cycle) is
//! attached as a root instead.

use scraper::{ElementRef, Html, Selector};

use crate::types::{Comment, PipelineError, Post};

/// Listing-row summary; the detail fetch fills in the rest.
#[derive(Clone, Debug)]
pub struct PostStub {
    pub id: String,
    pub title: String,
    pub author: String,
    pub published_at: String,
    pub view_count: u64,
}

// Selectors are static strings validated by the test suite; a parse failure
// here is a programming error, not bad input.
fn sel(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector")
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn parse_count(raw: &str) -> u64 {
    raw.replace(',', "")
        .replace("조회", "")
        .trim()
        .parse()
        .unwrap_or(0)
}

/// Extracts post stubs from a gallery listing page.
///
/// Notice rows, ads, and rows with non-numeric ids are skipped silently;
/// a page with no recognizable listing table is `MalformedContent`.
pub fn parse_post_list(html: &str) -> Result<Vec<PostStub>, PipelineError> {
    let doc = Html::parse_document(html);
    let row_sel = sel("tr.ub-content");
    let id_sel = sel("td.gall_num");
    let title_sel = sel("td.gall_tit > a");
    let author_sel = sel("td.gall_writer");
    let date_sel = sel("td.gall_date");
    let views_sel = sel("td.gall_count");

    let mut stubs = Vec::new();
    let mut saw_rows = false;

    for row in doc.select(&row_sel) {
        saw_rows = true;

        let Some(id_el) = row.select(&id_sel).next() else {
            continue;
        };
        let Some(title_el) = row.select(&title_sel).next() else {
            continue;
        };

        let id = text_of(id_el);
        // Sticky/notice rows carry non-numeric markers in the id column.
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        let published_at = row
            .select(&date_sel)
            .next()
            .map(|el| {
                el.value()
                    .attr("title")
                    .map(str::to_string)
                    .unwrap_or_else(|| text_of(el))
            })
            .unwrap_or_default();

        stubs.push(PostStub {
            id,
            title: text_of(title_el),
            author: row
                .select(&author_sel)
                .next()
                .map(text_of)
                .unwrap_or_else(|| "익명".to_string()),
            published_at,
            view_count: row
                .select(&views_sel)
                .next()
                .map(|el| parse_count(&text_of(el)))
                .unwrap_or(0),
        });
    }

    if !saw_rows {
        return Err(PipelineError::MalformedContent(
            "no listing rows found".into(),
        ));
    }
    Ok(stubs)
}

/// Normalizes a post view page into a full [`Post`].
///
/// Title, body, and id are required; their absence is `MalformedContent`
/// and the caller drops the page without retrying.
pub fn parse_post_detail(
    html: &str,
    gallery_id: &str,
    post_id: &str,
    source_url: &str,
) -> Result<Post, PipelineError> {
    if post_id.is_empty() {
        return Err(PipelineError::MalformedContent("post id missing".into()));
    }

    let doc = Html::parse_document(html);

    let title = doc
        .select(&sel("span.title_subject"))
        .next()
        .map(text_of)
        .unwrap_or_default();
    if title.is_empty() {
        return Err(PipelineError::MalformedContent(format!(
            "post {post_id}: title missing"
        )));
    }

    let body = doc
        .select(&sel("div.write_div"))
        .next()
        .map(|el| {
            el.text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if body.is_empty() {
        return Err(PipelineError::MalformedContent(format!(
            "post {post_id}: body missing"
        )));
    }

    let author = doc
        .select(&sel("div.fl > span.gall_writer"))
        .next()
        .and_then(|el| el.value().attr("data-nick"))
        .unwrap_or("익명")
        .to_string();

    let published_at = doc
        .select(&sel("span.gall_date"))
        .next()
        .map(|el| {
            el.value()
                .attr("title")
                .map(str::to_string)
                .unwrap_or_else(|| text_of(el))
        })
        .unwrap_or_default();

    let view_count = doc
        .select(&sel("span.gall_count"))
        .next()
        .map(|el| parse_count(&text_of(el)))
        .unwrap_or(0);

    let upvote_count = doc
        .select(&sel("p.up_num"))
        .next()
        .map(|el| parse_count(&text_of(el)))
        .unwrap_or(0);

    Ok(Post {
        id: post_id.to_string(),
        gallery_id: gallery_id.to_string(),
        title,
        body,
        author,
        published_at,
        view_count,
        upvote_count,
        source_url: source_url.to_string(),
        comments: parse_comments(&doc),
    })
}

struct RawComment {
    id: String,
    parent: String,
    comment: Comment,
}

/// Parses the flat comment list and rebuilds the reply tree.
fn parse_comments(doc: &Html) -> Vec<Comment> {
    let item_sel = sel("li.ub-content[data-no]");
    let nick_sel = sel("span.nick");
    let text_sel = sel("p.usertxt");
    let date_sel = sel("span.date_time");

    let mut order: Vec<RawComment> = Vec::new();
    for el in doc.select(&item_sel) {
        let Some(id) = el.value().attr("data-no") else {
            continue;
        };
        order.push(RawComment {
            id: id.to_string(),
            parent: el.value().attr("data-parent").unwrap_or("").to_string(),
            comment: Comment {
                id: id.to_string(),
                author: el
                    .select(&nick_sel)
                    .next()
                    .map(text_of)
                    .unwrap_or_else(|| "익명".to_string()),
                text: el.select(&text_sel).next().map(text_of).unwrap_or_default(),
                published_at: el.select(&date_sel).next().map(text_of).unwrap_or_default(),
                replies: Vec::new(),
            },
        });
    }
    assemble_tree(order)
}

/// One indexed pass over the arena. A comment is a reply only when its parent
/// appeared strictly earlier in document order and is not itself; anything
/// else (missing parent, self-reference, forward/back edge that would form a
/// cycle) becomes a root. Assembly walks the order in reverse so children are
/// always built before their parent, without recursion.
fn assemble_tree(order: Vec<RawComment>) -> Vec<Comment> {
    use std::collections::{HashMap, HashSet};

    let mut seen: HashSet<&str> = HashSet::new();
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    let mut roots: Vec<String> = Vec::new();

    for raw in &order {
        let valid_parent =
            !raw.parent.is_empty() && raw.parent != raw.id && seen.contains(raw.parent.as_str());
        if valid_parent {
            children
                .entry(raw.parent.clone())
                .or_default()
                .push(raw.id.clone());
        } else {
            roots.push(raw.id.clone());
        }
        seen.insert(raw.id.as_str());
    }

    let ids: Vec<String> = order.iter().map(|r| r.id.clone()).collect();
    let mut built: HashMap<String, Comment> =
        order.into_iter().map(|r| (r.id, r.comment)).collect();

    for id in ids.iter().rev() {
        if let Some(kids) = children.remove(id) {
            let replies: Vec<Comment> = kids.iter().filter_map(|k| built.remove(k)).collect();
            if let Some(node) = built.get_mut(id) {
                node.replies = replies;
            }
        }
    }

    roots.iter().filter_map(|r| built.remove(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn listing_fixture() -> String {
        r#"<table>
            <tr class="ub-content">
                <td class="gall_num">공지</td>
                <td class="gall_tit"><a href="/board/view/?id=g&no=1">공지사항</a></td>
            </tr>
            <tr class="ub-content">
                <td class="gall_num">101</td>
                <td class="gall_tit"><a href="/board/view/?id=g&no=101">첫 번째 글</a></td>
                <td class="gall_writer">작성자1</td>
                <td class="gall_date" title="2025-06-01 10:00:00">06.01</td>
                <td class="gall_count">1,234</td>
            </tr>
            <tr class="ub-content">
                <td class="gall_num">102</td>
                <td class="gall_tit"><a href="/board/view/?id=g&no=102">두 번째 글</a></td>
                <td class="gall_writer">작성자2</td>
                <td class="gall_date" title="2025-06-02 11:00:00">06.02</td>
                <td class="gall_count">56</td>
            </tr>
        </table>"#
            .to_string()
    }

    #[test]
    fn listing_skips_notices_and_parses_stubs() {
        let stubs = parse_post_list(&listing_fixture()).unwrap();
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].id, "101");
        assert_eq!(stubs[0].view_count, 1234);
        assert_eq!(stubs[0].published_at, "2025-06-01 10:00:00");
        assert_eq!(stubs[1].title, "두 번째 글");
    }

    #[test]
    fn empty_page_is_malformed() {
        let result = parse_post_list("<html><body><p>nothing</p></body></html>");
        assert!(matches!(result, Err(PipelineError::MalformedContent(_))));
    }

    fn detail_fixture(comments: &str) -> String {
        format!(
            r#"<html><body>
                <span class="title_subject">엘든링 메타 정리</span>
                <div class="fl"><span class="gall_writer" data-nick="고인물"></span></div>
                <span class="gall_date" title="2025-06-01 12:00:00">06.01</span>
                <span class="gall_count">조회 987</span>
                <p class="up_num">42</p>
                <div class="write_div"><p>현재 메타는 출혈 위주.</p><p>패치로 바뀔 수 있음.</p></div>
                <ul>{comments}</ul>
            </body></html>"#
        )
    }

    #[test]
    fn detail_parses_required_and_optional_fields() {
        let html = detail_fixture("");
        let post = parse_post_detail(&html, "eldenring", "555", "https://g/555").unwrap();
        assert_eq!(post.title, "엘든링 메타 정리");
        assert_eq!(post.author, "고인물");
        assert_eq!(post.view_count, 987);
        assert_eq!(post.upvote_count, 42);
        assert!(post.body.contains("출혈"));
        assert!(post.comments.is_empty());
    }

    #[test]
    fn missing_title_or_body_is_malformed() {
        let no_body = r#"<html><span class="title_subject">제목</span></html>"#;
        assert!(matches!(
            parse_post_detail(no_body, "g", "1", "u"),
            Err(PipelineError::MalformedContent(_))
        ));
        let no_title = r#"<html><div class="write_div">본문</div></html>"#;
        assert!(matches!(
            parse_post_detail(no_title, "g", "1", "u"),
            Err(PipelineError::MalformedContent(_))
        ));
    }

    #[test]
    fn comment_tree_nests_replies_in_site_order() {
        let comments = r#"
            <li class="ub-content" data-no="c1" data-parent="">
                <span class="nick">닉1</span><p class="usertxt">본댓글</p>
                <span class="date_time">06.01 12:10</span>
            </li>
            <li class="ub-content" data-no="c2" data-parent="c1">
                <span class="nick">닉2</span><p class="usertxt">대댓글</p>
                <span class="date_time">06.01 12:11</span>
            </li>
            <li class="ub-content" data-no="c3" data-parent="">
                <span class="nick">닉3</span><p class="usertxt">다른 댓글</p>
                <span class="date_time">06.01 12:12</span>
            </li>"#;
        let html = detail_fixture(comments);
        let post = parse_post_detail(&html, "g", "9", "u").unwrap();
        assert_eq!(post.comments.len(), 2);
        assert_eq!(post.comments[0].id, "c1");
        assert_eq!(post.comments[0].replies.len(), 1);
        assert_eq!(post.comments[0].replies[0].text, "대댓글");
        assert_eq!(post.comments[1].id, "c3");
    }

    #[test]
    fn cycle_and_orphan_edges_become_roots() {
        // c1 points at c2 which appears later (a back-edge once c2 points at
        // c1 again), c9's parent never exists, c5 references itself.
        let comments = r#"
            <li class="ub-content" data-no="c1" data-parent="c2"><p class="usertxt">a</p></li>
            <li class="ub-content" data-no="c2" data-parent="c1"><p class="usertxt">b</p></li>
            <li class="ub-content" data-no="c9" data-parent="ghost"><p class="usertxt">c</p></li>
            <li class="ub-content" data-no="c5" data-parent="c5"><p class="usertxt">d</p></li>"#;
        let html = detail_fixture(comments);
        let post = parse_post_detail(&html, "g", "9", "u").unwrap();
        // c1 (forward edge), c9 (orphan), c5 (self) are roots; c2 nests under c1.
        assert_eq!(post.comments.len(), 3);
        let c1 = post.comments.iter().find(|c| c.id == "c1").unwrap();
        assert_eq!(c1.replies.len(), 1);
        assert_eq!(c1.replies[0].id, "c2");
    }
}
