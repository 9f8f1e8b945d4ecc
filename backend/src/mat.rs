use anyhow::Result;
use opencv::{
    boxed_ref::BoxedRef,
    core::{Mat, MatTraitConst, flip},
};
use platforms::capture::Frame;

/// A grayscale [`Mat`] that owns the external buffer.
#[derive(Debug)]
pub struct OwnedMat {
    rows: i32,
    cols: i32,
    bytes: Vec<u8>,
}

impl OwnedMat {
    #[inline]
    pub fn new(frame: Frame) -> Result<Self> {
        let owned = Self {
            rows: frame.height,
            cols: frame.width,
            bytes: frame.data,
        };
        let _ = owned.as_mat_inner()?;

        Ok(owned)
    }

    pub fn as_mat(&self) -> BoxedRef<'_, Mat> {
        self.as_mat_inner().expect("validated in new")
    }

    /// Copies into an independent [`Mat`], optionally flipped upside down.
    pub fn to_mat(&self, flip_vertical: bool) -> Result<Mat> {
        let mat = self.as_mat().try_clone()?;
        if !flip_vertical {
            return Ok(mat);
        }

        let mut flipped = Mat::default();
        flip(&mat, &mut flipped, 0)?;
        Ok(flipped)
    }

    fn as_mat_inner(&self) -> Result<BoxedRef<'_, Mat>> {
        Ok(Mat::new_rows_cols_with_bytes::<u8>(
            self.rows,
            self.cols,
            &self.bytes,
        )?)
    }
}
