//! Corpus reading.

use std::io;
use std::io::BufRead;

use thiserror::Error;

/// One parsed corpus token.
///
/// Carries the four fields retained from a ten-field corpus line: the
/// surface form, the POS tag, the head index, and the dependency
/// relation. The head index is the position of the head within the
/// sentence, 0 meaning attachment to the synthetic ROOT.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    pub form: String,
    pub pos: String,
    pub head: usize,
    pub relation: String,
}

/// A sentence as read from the corpus.
pub type Sentence = Vec<Token>;

#[derive(Debug, Error)]
pub enum CorpusError {
    /// A token line that does not have exactly ten fields.
    #[error("Illegal line: {line}")]
    IllegalLine { line: String },

    /// A head field that does not parse as a non-negative integer.
    #[error("Illegal head index '{value}' in line: {line}")]
    IllegalHead { value: String, line: String },

    #[error(transparent)]
    IoError(#[from] io::Error),
}

/// Reader for blank-line separated sentences.
///
/// Every non-blank line must consist of ten whitespace-delimited
/// fields. Consecutive blank lines do not produce empty sentences, and
/// a final sentence without a trailing separator is still yielded.
pub struct Reader<R> {
    read: R,
}

impl<R> Reader<R>
where
    R: BufRead,
{
    pub fn new(read: R) -> Self {
        Reader { read }
    }

    fn read_sentence(&mut self) -> Result<Option<Sentence>, CorpusError> {
        let mut tokens = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            if self.read.read_line(&mut line)? == 0 {
                return if tokens.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(tokens))
                };
            }

            if line.trim().is_empty() {
                if tokens.is_empty() {
                    continue;
                }

                return Ok(Some(tokens));
            }

            tokens.push(parse_line(line.trim_end())?);
        }
    }
}

impl<R> Iterator for Reader<R>
where
    R: BufRead,
{
    type Item = Result<Sentence, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_sentence().transpose()
    }
}

fn parse_line(line: &str) -> Result<Token, CorpusError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 10 {
        return Err(CorpusError::IllegalLine {
            line: line.to_owned(),
        });
    }

    let head = fields[6].parse().map_err(|_| CorpusError::IllegalHead {
        value: fields[6].to_owned(),
        line: line.to_owned(),
    })?;

    Ok(Token {
        form: fields[1].to_owned(),
        pos: fields[3].to_owned(),
        head,
        relation: fields[7].to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{CorpusError, Reader, Token};

    static SMALL_CORPUS: &str = "1\tHij\thij\tPRON\tPRON\t_\t2\tnsubj\t_\t_
2\tslaapt\tslapen\tVERB\tVERB\t_\t0\troot\t_\t_

1\tZe\tze\tPRON\tPRON\t_\t2\tnsubj\t_\t_
2\tleest\tlezen\tVERB\tVERB\t_\t0\troot\t_\t_
3\t.\t.\tPUNCT\tPUNCT\t_\t2\tpunct\t_\t_
";

    fn token(form: &str, pos: &str, head: usize, relation: &str) -> Token {
        Token {
            form: form.to_owned(),
            pos: pos.to_owned(),
            head,
            relation: relation.to_owned(),
        }
    }

    #[test]
    fn reads_sentences() {
        let sentences = Reader::new(Cursor::new(SMALL_CORPUS))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(
            sentences,
            vec![
                vec![
                    token("Hij", "PRON", 2, "nsubj"),
                    token("slaapt", "VERB", 0, "root"),
                ],
                vec![
                    token("Ze", "PRON", 2, "nsubj"),
                    token("leest", "VERB", 0, "root"),
                    token(".", "PUNCT", 2, "punct"),
                ],
            ]
        );
    }

    #[test]
    fn yields_final_sentence_without_separator() {
        let corpus = "1\tHij\thij\tPRON\tPRON\t_\t2\tnsubj\t_\t_\n\
                      2\tslaapt\tslapen\tVERB\tVERB\t_\t0\troot\t_\t_";
        let sentences = Reader::new(Cursor::new(corpus))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(sentences.len(), 1);
        assert_eq!(sentences[0].len(), 2);
    }

    #[test]
    fn skips_consecutive_separators() {
        let corpus = "\n\n1\tHij\thij\tPRON\tPRON\t_\t0\troot\t_\t_\n\n\n";
        let sentences = Reader::new(Cursor::new(corpus))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(sentences.len(), 1);
    }

    #[test]
    fn rejects_line_with_wrong_field_count() {
        let corpus = "1\tHij\thij\tPRON\tPRON\t_\t2\tnsubj\t_\n";
        let result = Reader::new(Cursor::new(corpus)).next().unwrap();
        assert!(matches!(result, Err(CorpusError::IllegalLine { .. })));
    }

    #[test]
    fn rejects_unparsable_head() {
        let corpus = "1\tHij\thij\tPRON\tPRON\t_\ttwo\tnsubj\t_\t_\n";
        let result = Reader::new(Cursor::new(corpus)).next().unwrap();
        assert!(matches!(result, Err(CorpusError::IllegalHead { .. })));
    }
}
