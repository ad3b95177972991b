use crate::block::Header;
use crate::error::Result;
use crate::streams::BoxedStream;

/// The chains of one query under construction.
///
/// Builder steps take the pipeline by value and hand it back, so exactly one
/// step owns it at a time. `streams_with_non_joined_data` holds the readers of
/// RIGHT and FULL join rows that never matched; they are only read after
/// every main chain has finished.
#[derive(Default)]
pub struct Pipeline {
    pub streams: Vec<BoxedStream>,
    pub streams_with_non_joined_data: Vec<BoxedStream>,
}

impl Pipeline {
    #[must_use]
    pub fn new(streams: Vec<BoxedStream>) -> Self {
        Self { streams, streams_with_non_joined_data: Vec::new() }
    }

    /// Wrap every chain, non-joined ones included, with `f`.
    ///
    /// # Errors
    /// The first error `f` returns.
    pub fn transform(mut self, mut f: impl FnMut(BoxedStream) -> Result<BoxedStream>) -> Result<Self> {
        self.streams = self.streams.into_iter().map(&mut f).collect::<Result<Vec<_>>>()?;
        self.streams_with_non_joined_data =
            self.streams_with_non_joined_data.into_iter().map(&mut f).collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// Wrap only the main chains with `f`.
    ///
    /// # Errors
    /// The first error `f` returns.
    pub fn transform_main(mut self, f: impl FnMut(BoxedStream) -> Result<BoxedStream>) -> Result<Self> {
        self.streams = self.streams.into_iter().map(f).collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    #[must_use]
    pub fn has_more_than_one_stream(&self) -> bool {
        self.streams.len() + self.streams_with_non_joined_data.len() > 1
    }

    #[must_use]
    pub fn first_stream(&self) -> Option<&BoxedStream> {
        self.streams.first().or_else(|| self.streams_with_non_joined_data.first())
    }

    /// Header of the first chain; every chain shares it.
    #[must_use]
    pub fn header(&self) -> Header {
        self.first_stream().map(|s| s.header()).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("streams", &self.streams.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("non_joined", &self.streams_with_non_joined_data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;
    use crate::streams::NullStream;
    use crate::types::DataType;

    fn null() -> BoxedStream {
        Box::new(NullStream::new(Header::new(vec![Field::new("x", DataType::Int64)])))
    }

    #[test]
    fn non_joined_streams_count_towards_width() {
        let mut pipeline = Pipeline::new(vec![null()]);
        assert!(!pipeline.has_more_than_one_stream());
        pipeline.streams_with_non_joined_data.push(null());
        assert!(pipeline.has_more_than_one_stream());
    }

    #[test]
    fn transform_reaches_non_joined_streams() {
        let mut pipeline = Pipeline::new(vec![null(), null()]);
        pipeline.streams_with_non_joined_data.push(null());
        let mut wrapped = 0;
        let pipeline = pipeline
            .transform(|s| {
                wrapped += 1;
                Ok(s)
            })
            .unwrap();
        assert_eq!(wrapped, 3);

        let mut wrapped = 0;
        let pipeline = pipeline
            .transform_main(|s| {
                wrapped += 1;
                Ok(s)
            })
            .unwrap();
        assert_eq!(wrapped, 2);
        assert_eq!(pipeline.header().names(), vec!["x"]);
    }
}
